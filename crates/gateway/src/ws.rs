//! Per-connection actor.
//!
//! One task owns one WebSocket and is the only code allowed to touch its
//! private state. The loop services exactly one event per iteration:
//! inbound frame, outbound frame, liveness tick, or cancellation. Nothing
//! outside the task reaches the buffers; collaborators see only the
//! outbound sender and the cancellation token.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, StreamExt, stream::SplitSink},
    tokio::{
        sync::mpsc,
        time::{Instant, interval_at, timeout},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use lunar_auth::Token;
use lunar_protocol::{
    Envelope, ProtocolError, WRITE_DEADLINE_SECS, error_codes,
};

use crate::{
    dispatch::{DispatchTable, HandlerContext},
    state::GatewayState,
};

/// Connection lifecycle. Transitions only move rightwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    /// Transport handshake complete, credential handshake pending.
    Authenticating,
    /// Admitted: registered in the roster.
    Active,
    /// Draining outbound frames before the transport drops.
    Closing,
}

struct Conn {
    state: ConnState,
    /// Set exactly once, at admission; taken exactly once, at teardown.
    identity: Option<String>,
    token: Option<Token>,
    last_inbound: Instant,
}

/// Drive one WebSocket connection to completion.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    dispatch: Arc<DispatchTable>,
    addr: SocketAddr,
) {
    debug!(%addr, "connection actor started");
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let cancel = CancellationToken::new();

    let liveness_deadline = Duration::from_secs(state.config.limits.liveness_deadline_secs);
    let probe_interval = liveness_deadline * 9 / 10;
    let mut probe = interval_at(Instant::now() + probe_interval, probe_interval);
    probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut conn = Conn {
        state: ConnState::Authenticating,
        identity: None,
        token: None,
        last_inbound: Instant::now(),
    };

    while conn.state != ConnState::Closing {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(%addr, identity = ?conn.identity, "connection kicked");
                conn.state = ConnState::Closing;
            },
            inbound = stream.next() => match inbound {
                Some(Ok(message)) => {
                    conn.last_inbound = Instant::now();
                    handle_message(&mut conn, message, &state, &dispatch, &out_tx, &cancel).await;
                },
                Some(Err(e)) => {
                    debug!(%addr, error = %e, "transport read error");
                    conn.state = ConnState::Closing;
                },
                None => {
                    debug!(%addr, "transport closed by peer");
                    conn.state = ConnState::Closing;
                },
            },
            outbound = out_rx.recv() => {
                // The actor holds a sender, so recv never yields None here.
                if let Some(frame) = outbound {
                    if write_frame(&mut sink, Message::Text(frame.into())).await.is_err() {
                        conn.state = ConnState::Closing;
                    }
                }
            },
            _ = probe.tick() => {
                if conn.last_inbound.elapsed() >= liveness_deadline {
                    info!(%addr, identity = ?conn.identity, "liveness deadline exceeded");
                    conn.state = ConnState::Closing;
                } else {
                    if write_frame(&mut sink, Message::Ping(Vec::new().into())).await.is_err() {
                        conn.state = ConnState::Closing;
                    }
                    check_token(&mut conn);
                }
            },
        }
    }

    // Closing: flush whatever is already queued, bounded by the write
    // deadline, then drop the transport.
    let flush_deadline = Instant::now() + Duration::from_secs(WRITE_DEADLINE_SECS);
    while let Ok(frame) = out_rx.try_recv() {
        if Instant::now() >= flush_deadline {
            break;
        }
        if write_frame(&mut sink, Message::Text(frame.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.send(Message::Close(None)).await;

    // Exactly one Leave per admitted connection, regardless of which close
    // path fired: the identity is taken out of the Option here and only
    // here.
    if let Some(identity) = conn.identity.take() {
        let survivors = state.sessions.write().await.remove_everywhere(&identity);
        for session in survivors {
            crate::dispatch::push_session_state(&state, session).await;
        }
        crate::dispatch::push_session_list(&state).await;
        if let Err(e) = state.roster.leave(&identity).await {
            warn!(identity = %identity, error = %e, "leave after close failed");
        }
        info!(%addr, identity = %identity, "connection closed");
    } else {
        debug!(%addr, "unadmitted connection closed");
    }
}

async fn handle_message(
    conn: &mut Conn,
    message: Message,
    state: &Arc<GatewayState>,
    dispatch: &Arc<DispatchTable>,
    out_tx: &mpsc::UnboundedSender<String>,
    cancel: &CancellationToken,
) {
    let text = match message {
        Message::Text(text) => text,
        // Pings are answered by the transport layer; both directions of
        // keepalive traffic refresh the read deadline above.
        Message::Ping(_) | Message::Pong(_) => return,
        Message::Close(_) => {
            conn.state = ConnState::Closing;
            return;
        },
        Message::Binary(_) => {
            send_error(conn, state, out_tx, error_codes::DECODE, "binary frames not accepted");
            return;
        },
    };

    if text.len() > state.config.limits.max_frame_bytes {
        send_error(conn, state, out_tx, error_codes::DECODE, "frame too large");
        return;
    }

    let envelope = match Envelope::decode(text.as_str()) {
        Ok(envelope) => envelope,
        Err(ProtocolError::UnknownMessageType(id)) => {
            send_error(
                conn,
                state,
                out_tx,
                error_codes::UNKNOWN_MESSAGE_TYPE,
                format!("unknown message type {id}"),
            );
            return;
        },
        Err(e) => {
            debug!(error = %e, "malformed frame");
            send_error(conn, state, out_tx, error_codes::DECODE, "malformed frame");
            return;
        },
    };

    let ctx = HandlerContext {
        state: Arc::clone(state),
        identity: conn.identity.clone(),
        sender: out_tx.clone(),
        cancel: cancel.clone(),
    };
    match dispatch.dispatch(ctx, envelope).await {
        Ok(output) => {
            for reply in output.replies {
                queue_envelope(out_tx, &reply);
            }
            if let Some(admission) = output.admit {
                conn.identity = Some(admission.identity);
                conn.token = Some(admission.token);
                conn.state = ConnState::Active;
            }
            if output.close {
                conn.state = ConnState::Closing;
            }
        },
        Err(shape) => {
            send_error(conn, state, out_tx, &shape.code, shape.message);
        },
    }
}

/// Queue a 114 and apply the close policy for its code.
fn send_error(
    conn: &mut Conn,
    state: &Arc<GatewayState>,
    out_tx: &mpsc::UnboundedSender<String>,
    code: &str,
    message: impl Into<String>,
) {
    let envelope = state.error_frame(code, message);
    queue_envelope(out_tx, &envelope);
    if GatewayState::error_closes_connection(code) {
        conn.state = ConnState::Closing;
    }
}

fn queue_envelope(out_tx: &mpsc::UnboundedSender<String>, envelope: &Envelope) {
    match envelope.encode() {
        Ok(frame) => {
            let _ = out_tx.send(frame);
        },
        Err(e) => warn!(error = %e, "outbound encode failed"),
    }
}

/// Token expiry is independent of the connection: the transport stays up,
/// only the long-term identity claim lapses.
fn check_token(conn: &mut Conn) {
    if let Some(token) = conn.token.as_mut() {
        if token.valid && token.is_expired(time::OffsetDateTime::now_utc()) {
            warn!(user_id = %token.user_id, "session token expired");
            token.revoke();
        }
    }
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
) -> Result<(), ()> {
    match timeout(Duration::from_secs(WRITE_DEADLINE_SECS), sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "transport write error");
            Err(())
        },
        Err(_) => {
            debug!("write deadline exceeded");
            Err(())
        },
    }
}
