//! Wire protocol for the Lunar Rocks gateway.
//!
//! One JSON object per WebSocket text frame:
//!
//! ```json
//! { "SourceID": <int|string>, "MessageID": <int>, "Payload": <variant> }
//! ```
//!
//! `MessageID` alone determines the payload shape. Decoding is two-stage:
//! the raw frame is parsed first, then the payload value is decoded into
//! the variant registered for that ID. An unregistered ID is an error,
//! never a silent no-op.

pub mod envelope;
pub mod error;

pub use envelope::{
    ConnectAck, Credentials, Envelope, Payload, SessionIds, SessionRef, SessionState, SourceId,
};
pub use error::{ErrorShape, ProtocolError, error_codes};

/// Protocol revision sent in connect acks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum accepted inbound frame size in bytes.
pub const MAX_FRAME_BYTES: usize = 1024;

/// How long a write may block before the connection is considered dead.
pub const WRITE_DEADLINE_SECS: u64 = 10;

/// A connection with no inbound traffic (frames or pongs) for this long is
/// treated as dead. Probes fire at nine tenths of the deadline.
pub const LIVENESS_DEADLINE_SECS: u64 = 60;

/// Capacity of the roster's request inbox.
pub const ROSTER_QUEUE_CAPACITY: usize = 1024;

// ── Message IDs ──────────────────────────────────────────────────────────────

/// Numeric message type discriminators.
///
/// Gaps in the numbering are IDs reserved for track-level operations this
/// core does not carry.
pub mod msg {
    /// Server push: one session's full state.
    pub const UPDATE_SESSION: u16 = 100;
    /// Client request: create a new session.
    pub const CREATE_SESSION: u16 = 101;
    /// Client request: join an existing session.
    pub const JOIN_SESSION: u16 = 103;
    /// Client request: leave a session.
    pub const LEAVE_SESSION: u16 = 104;
    /// Server push: the list of active session IDs.
    pub const SESSION_LIST: u16 = 105;
    /// Client request: orderly disconnect.
    pub const DISCONNECT: u16 = 106;
    /// Client request: credential handshake.
    pub const CLIENT_CONNECT: u16 = 112;
    /// Server reply: handshake accepted.
    pub const CONNECT_ACK: u16 = 113;
    /// Server reply: protocol or application error.
    pub const ERROR: u16 = 114;
}
