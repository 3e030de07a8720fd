use std::sync::Arc;

use {tokio::sync::RwLock, uuid::Uuid};

use {
    lunar_auth::Verifier, lunar_config::LunarConfig, lunar_roster::RosterHandle,
    lunar_protocol::{Envelope, error_codes},
};

use crate::{accounts::AccountService, sessions::SessionRegistry};

/// Shared gateway runtime state, wrapped in Arc for use across actor tasks.
pub struct GatewayState {
    /// This server's identity, used as SourceID on server-originated frames.
    pub server_id: String,
    pub version: String,
    pub hostname: String,
    pub config: LunarConfig,
    /// Submitter side of the roster loop.
    pub roster: RosterHandle,
    pub verifier: Verifier,
    pub accounts: Arc<dyn AccountService>,
    /// Session membership; mutated only through handlers.
    pub sessions: RwLock<SessionRegistry>,
}

impl GatewayState {
    pub fn new(
        config: LunarConfig,
        roster: RosterHandle,
        accounts: Arc<dyn AccountService>,
    ) -> Arc<Self> {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".into());

        Arc::new(Self {
            server_id: Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname,
            config,
            roster,
            verifier: Verifier::new(),
            accounts,
            sessions: RwLock::new(SessionRegistry::new()),
        })
    }

    /// Build a server-originated error (114) envelope.
    pub fn error_frame(&self, code: &str, message: impl Into<String>) -> Envelope {
        Envelope::error(&self.server_id, code, message)
    }

    /// Whether an error code terminates the connection that caused it.
    pub fn error_closes_connection(code: &str) -> bool {
        matches!(
            code,
            error_codes::DECODE | error_codes::AUTH_FAILED | error_codes::DUPLICATE_IDENTITY
        )
    }
}
