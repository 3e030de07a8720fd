//! The credential handshake (message 112).
//!
//! Admission order matters: verify first, then Join, then ack. A failed
//! verify mutates nothing: no roster entry, no token, no partial state.

use {time::Duration, tracing::{debug, info}};

use {
    lunar_auth::Token,
    lunar_protocol::{ConnectAck, Envelope, ErrorShape, Payload, SourceId, error_codes},
    lunar_roster::{ClientHandle, RosterError},
};

use crate::dispatch::{Admission, HandlerContext, HandlerOutput, HandlerResult};

/// Handler for 112: ClientConnect.
pub async fn client_connect(ctx: HandlerContext, payload: Payload) -> HandlerResult {
    let Payload::ClientConnect(creds) = payload else {
        return Err(ErrorShape::new(error_codes::DECODE, "wrong payload variant"));
    };

    // A 112 on an already-admitted connection re-acks idempotently;
    // clients retransmit the handshake after short network blips.
    if let Some(identity) = ctx.identity.as_deref() {
        debug!(identity, "duplicate handshake, re-acking");
        return Ok(HandlerOutput::reply(ack(&ctx, identity).await));
    }

    let presented = creds
        .decode_hash()
        .map_err(|_| ErrorShape::new(error_codes::AUTH_FAILED, "invalid hash encoding"))?;

    // Unknown user and key mismatch produce the same reply; the handshake
    // leaks nothing about which usernames exist.
    let Some(stored) = ctx.state.accounts.lookup(&creds.username).await else {
        debug!(username = %creds.username, "handshake for unknown user");
        return Err(ErrorShape::new(error_codes::AUTH_FAILED, "authentication failed"));
    };
    ctx.state
        .verifier
        .verify(&presented, &stored.derived_key)
        .map_err(|_| ErrorShape::new(error_codes::AUTH_FAILED, "authentication failed"))?;

    let token = Token::mint(
        &stored.user_id,
        Duration::days(ctx.state.config.auth.token_ttl_days),
    );

    let client = ClientHandle::new(&creds.username, ctx.sender.clone(), ctx.cancel.clone());
    match ctx.state.roster.join(client, &stored.user_id).await {
        Ok(()) => {},
        Err(RosterError::DuplicateIdentity(identity)) => {
            return Err(ErrorShape::new(
                error_codes::DUPLICATE_IDENTITY,
                format!("{identity:?} is already connected"),
            ));
        },
        Err(RosterError::Closed) => {
            return Err(ErrorShape::new(error_codes::AUTH_FAILED, "server shutting down"));
        },
    }

    info!(identity = %creds.username, "client admitted");
    Ok(HandlerOutput {
        replies: vec![ack(&ctx, &creds.username).await],
        admit: Some(Admission {
            identity: creds.username,
            user_id: stored.user_id,
            token,
        }),
        close: false,
    })
}

async fn ack(ctx: &HandlerContext, identity: &str) -> Envelope {
    let session_ids = ctx.state.sessions.read().await.ids();
    Envelope::new(
        SourceId::from(ctx.state.server_id.as_str()),
        Payload::ConnectAck(ConnectAck {
            client_id: identity.to_string(),
            session_ids,
        }),
    )
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use {tokio::sync::mpsc, tokio_util::sync::CancellationToken};

    use {lunar_protocol::Credentials, lunar_roster::Roster};

    use super::*;
    use crate::{accounts::InMemoryAccounts, state::GatewayState};

    async fn state_with_user(username: &str, secret: &[u8], salt: &[u8]) -> Arc<GatewayState> {
        let (roster, _task) = Roster::spawn();
        let accounts = Arc::new(InMemoryAccounts::new());
        let state = GatewayState::new(lunar_config::LunarConfig::default(), roster, accounts.clone());
        accounts
            .provision(&state.verifier, username, secret, salt)
            .await
            .unwrap();
        state
    }

    fn ctx(state: &Arc<GatewayState>, identity: Option<&str>) -> HandlerContext {
        let (tx, rx) = mpsc::unbounded_channel();
        std::mem::forget(rx);
        HandlerContext {
            state: Arc::clone(state),
            identity: identity.map(str::to_string),
            sender: tx,
            cancel: CancellationToken::new(),
        }
    }

    fn connect_payload(state: &Arc<GatewayState>, username: &str, secret: &[u8], salt: &[u8]) -> Payload {
        let key = state.verifier.derive_key(secret, salt).unwrap();
        Payload::ClientConnect(Credentials {
            username: username.into(),
            hash: Credentials::encode_hash(&key),
        })
    }

    #[tokio::test]
    async fn valid_handshake_admits_and_acks() {
        let state = state_with_user("uname0", b"browser0secret", b"salt00").await;
        let payload = connect_payload(&state, "uname0", b"browser0secret", b"salt00");

        let out = client_connect(ctx(&state, None), payload).await.unwrap();
        let admission = out.admit.unwrap();
        assert_eq!(admission.identity, "uname0");
        assert_eq!(admission.user_id, "user:uname0");
        assert!(admission.token.is_usable(time::OffsetDateTime::now_utc()));
        match &out.replies[0].payload {
            Payload::ConnectAck(a) => assert_eq!(a.client_id, "uname0"),
            other => panic!("wrong reply: {other:?}"),
        }
        assert_eq!(state.roster.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn wrong_key_is_rejected_with_no_roster_entry() {
        let state = state_with_user("uname0", b"browser0secret", b"salt00").await;
        let payload = connect_payload(&state, "uname0", b"wrong-secret", b"salt00");

        let err = client_connect(ctx(&state, None), payload).await.unwrap_err();
        assert_eq!(err.code, error_codes::AUTH_FAILED);
        assert_eq!(state.roster.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_user_reads_the_same_as_wrong_key() {
        let state = state_with_user("uname0", b"browser0secret", b"salt00").await;
        let payload = connect_payload(&state, "ghost", b"browser0secret", b"salt00");

        let err = client_connect(ctx(&state, None), payload).await.unwrap_err();
        assert_eq!(err.code, error_codes::AUTH_FAILED);
        assert_eq!(err.message, "authentication failed");
    }

    #[tokio::test]
    async fn second_connection_for_same_identity_is_rejected() {
        let state = state_with_user("uname0", b"browser0secret", b"salt00").await;
        let payload = connect_payload(&state, "uname0", b"browser0secret", b"salt00");

        client_connect(ctx(&state, None), payload.clone())
            .await
            .unwrap();
        let err = client_connect(ctx(&state, None), payload).await.unwrap_err();
        assert_eq!(err.code, error_codes::DUPLICATE_IDENTITY);
        assert_eq!(state.roster.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn repeat_handshake_on_admitted_connection_reacks() {
        let state = state_with_user("uname0", b"browser0secret", b"salt00").await;
        let payload = connect_payload(&state, "uname0", b"browser0secret", b"salt00");

        let out = client_connect(ctx(&state, Some("uname0")), payload)
            .await
            .unwrap();
        assert!(out.admit.is_none());
        match &out.replies[0].payload {
            Payload::ConnectAck(a) => assert_eq!(a.client_id, "uname0"),
            other => panic!("wrong reply: {other:?}"),
        }
        // No second roster entry from the re-ack path.
        assert_eq!(state.roster.count().await.unwrap(), 0);
    }
}
