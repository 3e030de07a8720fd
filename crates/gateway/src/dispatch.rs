//! The static dispatch table: message ID → handler.
//!
//! Built once at startup and never mutated. Handlers receive the decoded,
//! typed payload and the issuing connection's identity; they return
//! envelopes for the connection's own outbound queue and express roster
//! effects through [`HandlerOutput`]; they never touch the roster's maps.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use {tokio::sync::mpsc, tokio_util::sync::CancellationToken, tracing::warn};

use {
    lunar_auth::Token,
    lunar_protocol::{
        Envelope, ErrorShape, Payload, SessionIds, SessionState, SourceId, error_codes, msg,
    },
};

use crate::{handshake, state::GatewayState};

// ── Types ────────────────────────────────────────────────────────────────────

/// Context passed to every handler: shared state plus what the connection
/// actor exposes about itself.
pub struct HandlerContext {
    pub state: Arc<GatewayState>,
    /// Session identity, present once the handshake has completed.
    pub identity: Option<String>,
    /// This connection's outbound frame queue.
    pub sender: mpsc::UnboundedSender<String>,
    /// Cancelling this closes the connection.
    pub cancel: CancellationToken,
}

impl HandlerContext {
    /// The identity, or the typed error every pre-handshake request gets.
    fn require_identity(&self) -> Result<&str, ErrorShape> {
        self.identity.as_deref().ok_or_else(|| {
            ErrorShape::new(error_codes::NOT_AUTHENTICATED, "handshake required")
        })
    }
}

/// A successful handshake: the actor applies this to become Active.
#[derive(Debug)]
pub struct Admission {
    pub identity: String,
    pub user_id: String,
    pub token: Token,
}

/// What a handler asks the connection actor to do.
#[derive(Debug, Default)]
pub struct HandlerOutput {
    /// Envelopes for this connection, in order.
    pub replies: Vec<Envelope>,
    /// Present on handshake success; triggers the roster Join.
    pub admit: Option<Admission>,
    /// Transition the connection to Closing after the replies flush.
    pub close: bool,
}

impl HandlerOutput {
    pub fn reply(envelope: Envelope) -> Self {
        Self {
            replies: vec![envelope],
            ..Self::default()
        }
    }
}

pub type HandlerResult = Result<HandlerOutput, ErrorShape>;
type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
type HandlerFn = Box<dyn Fn(HandlerContext, Payload) -> HandlerFuture + Send + Sync>;

// ── Table ────────────────────────────────────────────────────────────────────

/// Maps each inbound message ID to its handler.
pub struct DispatchTable {
    handlers: HashMap<u16, HandlerFn>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! handler {
    ($f:path) => {
        Box::new(|ctx, payload| -> HandlerFuture { Box::pin($f(ctx, payload)) })
    };
}

impl DispatchTable {
    pub fn new() -> Self {
        let mut handlers: HashMap<u16, HandlerFn> = HashMap::new();
        handlers.insert(msg::CLIENT_CONNECT, handler!(handshake::client_connect));
        handlers.insert(msg::CREATE_SESSION, handler!(create_session));
        handlers.insert(msg::JOIN_SESSION, handler!(join_session));
        handlers.insert(msg::LEAVE_SESSION, handler!(leave_session));
        handlers.insert(msg::DISCONNECT, handler!(disconnect));
        Self { handlers }
    }

    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.handlers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Look up and invoke the handler for a decoded envelope. A decodable
    /// ID with no handler (server-to-client types echoed back, say) is the
    /// typed unknown-message error, never a silent no-op.
    pub async fn dispatch(&self, ctx: HandlerContext, envelope: Envelope) -> HandlerResult {
        let id = envelope.payload.message_id();
        let Some(handler) = self.handlers.get(&id) else {
            return Err(ErrorShape::new(
                error_codes::UNKNOWN_MESSAGE_TYPE,
                format!("no handler for message type {id}"),
            ));
        };
        handler(ctx, envelope.payload).await
    }
}

// ── Push helpers ─────────────────────────────────────────────────────────────

/// Push the active session-ID list (105) to every connected client.
pub async fn push_session_list(state: &Arc<GatewayState>) {
    let ids = state.sessions.read().await.ids();
    let envelope = Envelope::new(
        SourceId::from(state.server_id.as_str()),
        Payload::SessionList(SessionIds { session_ids: ids }),
    );
    match envelope.encode() {
        Ok(frame) => {
            if let Err(e) = state.roster.broadcast(&frame).await {
                warn!(error = %e, "session list broadcast failed");
            }
        },
        Err(e) => warn!(error = %e, "session list encode failed"),
    }
}

/// Push one session's state (100) to its members.
pub async fn push_session_state(state: &Arc<GatewayState>, session: SessionState) {
    let members = session.clients.clone();
    let envelope = Envelope::new(
        SourceId::from(state.server_id.as_str()),
        Payload::UpdateSession(session),
    );
    match envelope.encode() {
        Ok(frame) => {
            if let Err(e) = state.roster.send_to(members, &frame).await {
                warn!(error = %e, "session state push failed");
            }
        },
        Err(e) => warn!(error = %e, "session state encode failed"),
    }
}

// ── Session handlers ─────────────────────────────────────────────────────────

/// 101: create a session; reply with its state, push the list to everyone.
async fn create_session(ctx: HandlerContext, _payload: Payload) -> HandlerResult {
    ctx.require_identity()?;
    let session = {
        let mut sessions = ctx.state.sessions.write().await;
        let id = sessions.create();
        sessions.state(id)
    };
    let Some(session) = session else {
        // create() just inserted the id; absence would be a registry bug.
        return Err(ErrorShape::new(error_codes::SESSION_NOT_FOUND, "session vanished"));
    };
    push_session_list(&ctx.state).await;
    Ok(HandlerOutput::reply(Envelope::new(
        SourceId::from(ctx.state.server_id.as_str()),
        Payload::UpdateSession(session),
    )))
}

/// 103: join a session; push the result to all members.
async fn join_session(ctx: HandlerContext, payload: Payload) -> HandlerResult {
    let identity = ctx.require_identity()?.to_string();
    let Payload::JoinSession(sref) = payload else {
        return Err(ErrorShape::new(error_codes::DECODE, "wrong payload variant"));
    };
    let joined = ctx
        .state
        .sessions
        .write()
        .await
        .join(sref.session_id, &identity);
    match joined {
        Some(session) => {
            push_session_state(&ctx.state, session).await;
            Ok(HandlerOutput::default())
        },
        None => Err(ErrorShape::new(
            error_codes::SESSION_NOT_FOUND,
            format!("no session {}", sref.session_id),
        )),
    }
}

/// 104: leave a session; push the survivors' state and the new list.
async fn leave_session(ctx: HandlerContext, payload: Payload) -> HandlerResult {
    let identity = ctx.require_identity()?.to_string();
    let Payload::LeaveSession(sref) = payload else {
        return Err(ErrorShape::new(error_codes::DECODE, "wrong payload variant"));
    };
    let remaining = ctx
        .state
        .sessions
        .write()
        .await
        .leave(sref.session_id, &identity);
    if let Some(session) = remaining {
        push_session_state(&ctx.state, session).await;
    }
    push_session_list(&ctx.state).await;
    Ok(HandlerOutput::default())
}

/// 106: orderly disconnect: leave every session, then close.
async fn disconnect(ctx: HandlerContext, _payload: Payload) -> HandlerResult {
    let identity = ctx.require_identity()?.to_string();
    let survivors = ctx
        .state
        .sessions
        .write()
        .await
        .remove_everywhere(&identity);
    for session in survivors {
        push_session_state(&ctx.state, session).await;
    }
    push_session_list(&ctx.state).await;
    Ok(HandlerOutput {
        close: true,
        ..HandlerOutput::default()
    })
}
