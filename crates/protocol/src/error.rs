use serde::{Deserialize, Serialize};

/// Why a frame could not be turned into a typed [`Envelope`].
///
/// [`Envelope`]: crate::Envelope
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame was not a well-formed envelope object.
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// The message ID has no registered payload variant.
    #[error("unknown message type {0}")]
    UnknownMessageType(u16),

    /// The payload did not decode to the variant registered for this ID.
    #[error("invalid payload for message type {id}: {source}")]
    Payload {
        id: u16,
        #[source]
        source: serde_json::Error,
    },

    /// A credential hash field was not valid base64.
    #[error("invalid hash encoding: {0}")]
    HashEncoding(#[from] base64::DecodeError),
}

/// Stable machine-readable codes carried in error (114) payloads.
pub mod error_codes {
    pub const DECODE: &str = "decode";
    pub const UNKNOWN_MESSAGE_TYPE: &str = "unknown_message_type";
    pub const AUTH_FAILED: &str = "auth_failed";
    pub const DUPLICATE_IDENTITY: &str = "duplicate_identity";
    pub const NOT_AUTHENTICATED: &str = "not_authenticated";
    pub const SESSION_NOT_FOUND: &str = "session_not_found";
}

/// Payload of an error (114) envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorShape {
    /// One of [`error_codes`].
    pub code: String,
    /// Human-readable detail, safe to show to the remote client.
    pub message: String,
}

impl ErrorShape {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
