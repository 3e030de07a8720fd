use {
    base64::Engine,
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::{
    error::{ErrorShape, ProtocolError},
    msg,
};

// ── Wire types ───────────────────────────────────────────────────────────────

/// The sender field of an envelope.
///
/// Clients send a numeric placeholder (`0`) before admission and their
/// identity string afterwards; both forms are accepted on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceId {
    Num(i64),
    Name(String),
}

impl SourceId {
    /// The anonymous placeholder used before a handshake completes.
    pub fn anonymous() -> Self {
        SourceId::Num(0)
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            SourceId::Name(s) => Some(s.as_str()),
            SourceId::Num(_) => None,
        }
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        SourceId::Name(s.to_string())
    }
}

/// An envelope as it appears on the wire, payload still untyped.
#[derive(Debug, Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "SourceID")]
    source_id: SourceId,
    #[serde(rename = "MessageID")]
    message_id: u16,
    #[serde(rename = "Payload", default, skip_serializing_if = "Value::is_null")]
    payload: Value,
}

// ── Payload variants ─────────────────────────────────────────────────────────

/// Handshake credentials (message 112).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "Username")]
    pub username: String,
    /// Base64 (standard alphabet) of the client-side derived key.
    #[serde(rename = "Hash")]
    pub hash: String,
}

impl Credentials {
    /// Decode the presented derived key from its wire encoding.
    pub fn decode_hash(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(base64::engine::general_purpose::STANDARD.decode(&self.hash)?)
    }

    /// Encode a derived key for the wire.
    pub fn encode_hash(key: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(key)
    }
}

/// Handshake acknowledgment (message 113).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectAck {
    #[serde(rename = "ClientID")]
    pub client_id: String,
    #[serde(rename = "SessionIDs")]
    pub session_ids: Vec<u32>,
}

/// A payload naming one session (messages 103/104).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionRef {
    #[serde(rename = "SessionID")]
    pub session_id: u32,
}

/// The active session list (message 105).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIds {
    #[serde(rename = "SessionIDs")]
    pub session_ids: Vec<u32>,
}

/// One session's state as pushed to its members (message 100).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(rename = "SessionID")]
    pub session_id: u32,
    #[serde(rename = "Clients")]
    pub clients: Vec<String>,
    #[serde(rename = "Tempo")]
    pub tempo: u32,
}

/// The closed set of payload shapes, selected by message ID.
#[derive(Debug, Clone)]
pub enum Payload {
    UpdateSession(SessionState),
    CreateSession,
    JoinSession(SessionRef),
    LeaveSession(SessionRef),
    SessionList(SessionIds),
    Disconnect,
    ClientConnect(Credentials),
    ConnectAck(ConnectAck),
    Error(ErrorShape),
}

impl Payload {
    /// Decode a raw payload value into the variant registered for `id`.
    pub fn decode(id: u16, value: Value) -> Result<Self, ProtocolError> {
        let payload = |source| ProtocolError::Payload { id, source };
        match id {
            msg::UPDATE_SESSION => Ok(Payload::UpdateSession(
                serde_json::from_value(value).map_err(payload)?,
            )),
            msg::CREATE_SESSION => Ok(Payload::CreateSession),
            msg::JOIN_SESSION => Ok(Payload::JoinSession(
                serde_json::from_value(value).map_err(payload)?,
            )),
            msg::LEAVE_SESSION => Ok(Payload::LeaveSession(
                serde_json::from_value(value).map_err(payload)?,
            )),
            msg::SESSION_LIST => Ok(Payload::SessionList(
                serde_json::from_value(value).map_err(payload)?,
            )),
            msg::DISCONNECT => Ok(Payload::Disconnect),
            msg::CLIENT_CONNECT => Ok(Payload::ClientConnect(
                serde_json::from_value(value).map_err(payload)?,
            )),
            msg::CONNECT_ACK => Ok(Payload::ConnectAck(
                serde_json::from_value(value).map_err(payload)?,
            )),
            msg::ERROR => Ok(Payload::Error(
                serde_json::from_value(value).map_err(payload)?,
            )),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }

    /// The message ID this variant is registered under.
    pub fn message_id(&self) -> u16 {
        match self {
            Payload::UpdateSession(_) => msg::UPDATE_SESSION,
            Payload::CreateSession => msg::CREATE_SESSION,
            Payload::JoinSession(_) => msg::JOIN_SESSION,
            Payload::LeaveSession(_) => msg::LEAVE_SESSION,
            Payload::SessionList(_) => msg::SESSION_LIST,
            Payload::Disconnect => msg::DISCONNECT,
            Payload::ClientConnect(_) => msg::CLIENT_CONNECT,
            Payload::ConnectAck(_) => msg::CONNECT_ACK,
            Payload::Error(_) => msg::ERROR,
        }
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Payload::UpdateSession(v) => serde_json::to_value(v),
            Payload::CreateSession | Payload::Disconnect => Ok(Value::Null),
            Payload::JoinSession(v) | Payload::LeaveSession(v) => serde_json::to_value(v),
            Payload::SessionList(v) => serde_json::to_value(v),
            Payload::ClientConnect(v) => serde_json::to_value(v),
            Payload::ConnectAck(v) => serde_json::to_value(v),
            Payload::Error(v) => serde_json::to_value(v),
        }
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// A fully decoded message: sender, discriminator, typed payload.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub source_id: SourceId,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(source_id: SourceId, payload: Payload) -> Self {
        Self { source_id, payload }
    }

    /// Decode one text frame. Fails closed: any malformed frame, unknown
    /// message ID, or payload/variant mismatch is an error.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope = serde_json::from_str(frame)?;
        let payload = Payload::decode(raw.message_id, raw.payload)?;
        Ok(Self {
            source_id: raw.source_id,
            payload,
        })
    }

    /// Serialize for the wire.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let raw = RawEnvelope {
            source_id: self.source_id.clone(),
            message_id: self.payload.message_id(),
            payload: self.payload.to_value().map_err(ProtocolError::Decode)?,
        };
        serde_json::to_string(&raw).map_err(ProtocolError::Decode)
    }

    /// Build a server-originated error (114) envelope.
    pub fn error(server_id: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            source_id: SourceId::from(server_id),
            payload: Payload::Error(ErrorShape::new(code, message)),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes;

    #[test]
    fn decodes_handshake_frame() {
        let frame = r#"{"SourceID":0,"MessageID":112,"Payload":{"Username":"uname0","Hash":"AAEC"}}"#;
        let env = Envelope::decode(frame).unwrap();
        assert_eq!(env.source_id, SourceId::Num(0));
        match env.payload {
            Payload::ClientConnect(creds) => {
                assert_eq!(creds.username, "uname0");
                assert_eq!(creds.decode_hash().unwrap(), vec![0, 1, 2]);
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_message_id_is_an_error() {
        let frame = r#"{"SourceID":"abc","MessageID":999,"Payload":{}}"#;
        match Envelope::decode(frame) {
            Err(ProtocolError::UnknownMessageType(999)) => {},
            other => panic!("expected UnknownMessageType, got {other:?}"),
        }
    }

    #[test]
    fn payload_variant_mismatch_is_an_error() {
        // 103 requires a SessionID field.
        let frame = r#"{"SourceID":"abc","MessageID":103,"Payload":{"bogus":true}}"#;
        match Envelope::decode(frame) {
            Err(ProtocolError::Payload { id: 103, .. }) => {},
            other => panic!("expected Payload error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        match Envelope::decode("{not json") {
            Err(ProtocolError::Decode(_)) => {},
            other => panic!("expected Decode, got {other:?}"),
        }
    }

    #[test]
    fn envelope_round_trips_through_the_wire_form() {
        let env = Envelope::new(
            SourceId::from("server-1"),
            Payload::ConnectAck(ConnectAck {
                client_id: "uname0".into(),
                session_ids: vec![3, 7],
            }),
        );
        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        match decoded.payload {
            Payload::ConnectAck(ack) => {
                assert_eq!(ack.client_id, "uname0");
                assert_eq!(ack.session_ids, vec![3, 7]);
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn error_envelope_carries_code_and_message() {
        let env = Envelope::error("srv", error_codes::UNKNOWN_MESSAGE_TYPE, "no handler for 42");
        let text = env.encode().unwrap();
        assert!(text.contains(r#""MessageID":114"#));
        let decoded = Envelope::decode(&text).unwrap();
        match decoded.payload {
            Payload::Error(shape) => {
                assert_eq!(shape.code, error_codes::UNKNOWN_MESSAGE_TYPE);
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn empty_payload_messages_accept_null_and_absent() {
        let with_null = r#"{"SourceID":"abc","MessageID":106,"Payload":null}"#;
        let absent = r#"{"SourceID":"abc","MessageID":106}"#;
        assert!(matches!(
            Envelope::decode(with_null).unwrap().payload,
            Payload::Disconnect
        ));
        assert!(matches!(
            Envelope::decode(absent).unwrap().payload,
            Payload::Disconnect
        ));
    }
}
