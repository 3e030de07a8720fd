//! In-memory registry of active sessions and their membership.
//!
//! Sessions here are membership only: who is in which room. Track-level
//! state never reaches this core.

use std::collections::HashMap;

use lunar_protocol::SessionState;

pub const DEFAULT_TEMPO: u32 = 120;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: u32,
    pub clients: Vec<String>,
    pub tempo: u32,
}

impl Session {
    fn export(&self) -> SessionState {
        SessionState {
            session_id: self.id,
            clients: self.clients.clone(),
            tempo: self.tempo,
        }
    }
}

/// All active sessions. Owned by [`GatewayState`] behind a lock; handlers
/// are the only mutators.
///
/// [`GatewayState`]: crate::state::GatewayState
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<u32, Session>,
    next_id: u32,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty session and return its id.
    pub fn create(&mut self) -> u32 {
        self.next_id += 1;
        let id = self.next_id;
        self.sessions.insert(id, Session {
            id,
            clients: Vec::new(),
            tempo: DEFAULT_TEMPO,
        });
        id
    }

    /// Add a member. Joining twice is a no-op. Returns the updated state,
    /// or `None` if no such session exists.
    pub fn join(&mut self, session_id: u32, identity: &str) -> Option<SessionState> {
        let session = self.sessions.get_mut(&session_id)?;
        if !session.clients.iter().any(|c| c == identity) {
            session.clients.push(identity.to_string());
        }
        Some(session.export())
    }

    /// Remove a member. Empty sessions are reaped. Returns the remaining
    /// state (`None` for unknown or reaped sessions).
    pub fn leave(&mut self, session_id: u32, identity: &str) -> Option<SessionState> {
        let session = self.sessions.get_mut(&session_id)?;
        session.clients.retain(|c| c != identity);
        if session.clients.is_empty() {
            self.sessions.remove(&session_id);
            return None;
        }
        Some(session.export())
    }

    /// Remove a member from every session (disconnect path). Returns the
    /// surviving states of the sessions they were in.
    pub fn remove_everywhere(&mut self, identity: &str) -> Vec<SessionState> {
        let affected: Vec<u32> = self
            .sessions
            .values()
            .filter(|s| s.clients.iter().any(|c| c == identity))
            .map(|s| s.id)
            .collect();
        affected
            .into_iter()
            .filter_map(|id| self.leave(id, identity))
            .collect()
    }

    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn state(&self, session_id: u32) -> Option<SessionState> {
        self.sessions.get(&session_id).map(Session::export)
    }

    pub fn members(&self, session_id: u32) -> Vec<String> {
        self.sessions
            .get(&session_id)
            .map(|s| s.clients.clone())
            .unwrap_or_default()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_join_leave_cycle() {
        let mut reg = SessionRegistry::new();
        let sid = reg.create();
        assert_eq!(reg.ids(), vec![sid]);

        let state = reg.join(sid, "alice").unwrap();
        assert_eq!(state.clients, vec!["alice"]);
        assert_eq!(state.tempo, DEFAULT_TEMPO);

        // Duplicate join is a no-op.
        let state = reg.join(sid, "alice").unwrap();
        assert_eq!(state.clients.len(), 1);

        // Last leave reaps the session.
        assert!(reg.leave(sid, "alice").is_none());
        assert!(reg.ids().is_empty());
    }

    #[test]
    fn join_unknown_session_is_none() {
        let mut reg = SessionRegistry::new();
        assert!(reg.join(42, "alice").is_none());
    }

    #[test]
    fn remove_everywhere_cleans_all_memberships() {
        let mut reg = SessionRegistry::new();
        let a = reg.create();
        let b = reg.create();
        reg.join(a, "alice");
        reg.join(a, "bob");
        reg.join(b, "alice");

        let survivors = reg.remove_everywhere("alice");
        // Session a survives with bob; session b was reaped.
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].clients, vec!["bob"]);
        assert_eq!(reg.ids(), vec![a]);
    }
}
