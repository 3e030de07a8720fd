//! Gateway: WebSocket server, per-connection actors, typed dispatch.
//!
//! Lifecycle:
//! 1. Load config, build the account service and credential verifier
//! 2. Spawn the roster loop
//! 3. Build the dispatch table (static, immutable after startup)
//! 4. Start the HTTP server (health, WebSocket upgrade)
//! 5. One actor task per accepted WebSocket connection
//!
//! Persistent account storage lives behind the [`accounts::AccountService`]
//! trait; this crate never stores passwords.

pub mod accounts;
pub mod dispatch;
pub mod handshake;
pub mod server;
pub mod sessions;
pub mod state;
pub mod ws;
