//! The roster: single source of truth for who is currently connected.
//!
//! One spawned loop owns the membership maps; everything else talks to it
//! through a bounded request inbox (capacity 1024). Requests are applied
//! strictly in arrival order, which makes membership linearizable without
//! any shared locks. A full inbox blocks the submitting connection; there
//! is no timeout or shed policy, so a stalled roster loop stalls its
//! callers rather than dropping requests.

use std::{
    collections::HashMap,
    time::Instant,
};

use {
    tokio::sync::{mpsc, oneshot},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use lunar_protocol::ROSTER_QUEUE_CAPACITY;

// ── Types ────────────────────────────────────────────────────────────────────

/// What the roster stores per admitted connection: enough to reach the
/// connection from outside without touching its private state.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub identity: String,
    /// Feeds the connection's write loop with serialized frames.
    pub sender: mpsc::UnboundedSender<String>,
    /// Cancelling this asks the connection actor to close.
    pub cancel: CancellationToken,
    pub joined_at: Instant,
}

impl ClientHandle {
    pub fn new(
        identity: &str,
        sender: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            identity: identity.to_string(),
            sender,
            cancel,
            joined_at: Instant::now(),
        }
    }

    /// Queue a frame for this client. A send failure means the connection's
    /// write loop is gone; the connection's own actor handles teardown.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RosterError {
    /// The identity is already registered and active. The original
    /// registration is retained; duplicate joins never overwrite.
    #[error("identity {0:?} is already active")]
    DuplicateIdentity(String),

    /// The roster loop has shut down.
    #[error("roster is closed")]
    Closed,
}

/// Requests processed by the roster loop.
enum RosterRequest {
    Join {
        client: ClientHandle,
        /// External durable user id, indexed secondarily.
        user_id: String,
        reply: oneshot::Sender<Result<(), RosterError>>,
    },
    Leave {
        identity: String,
    },
    Kick {
        identity: String,
    },
    IsActive {
        reply: oneshot::Sender<bool>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    /// Send one frame to every active client.
    Broadcast {
        frame: String,
    },
    /// Send one frame to each named client that is still active.
    SendTo {
        identities: Vec<String>,
        frame: String,
    },
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Cheap-to-clone submitter side of the roster.
#[derive(Clone)]
pub struct RosterHandle {
    tx: mpsc::Sender<RosterRequest>,
}

impl RosterHandle {
    /// Register an identity. Rejects duplicates; blocks if the inbox is full.
    pub async fn join(&self, client: ClientHandle, user_id: &str) -> Result<(), RosterError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RosterRequest::Join {
                client,
                user_id: user_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| RosterError::Closed)?;
        rx.await.map_err(|_| RosterError::Closed)?
    }

    /// Idempotent removal; leaving an unknown identity is a no-op.
    pub async fn leave(&self, identity: &str) -> Result<(), RosterError> {
        self.tx
            .send(RosterRequest::Leave {
                identity: identity.to_string(),
            })
            .await
            .map_err(|_| RosterError::Closed)
    }

    /// Remove an identity and signal its connection to close.
    pub async fn kick(&self, identity: &str) -> Result<(), RosterError> {
        self.tx
            .send(RosterRequest::Kick {
                identity: identity.to_string(),
            })
            .await
            .map_err(|_| RosterError::Closed)
    }

    pub async fn is_active(&self) -> Result<bool, RosterError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RosterRequest::IsActive { reply })
            .await
            .map_err(|_| RosterError::Closed)?;
        rx.await.map_err(|_| RosterError::Closed)
    }

    pub async fn count(&self) -> Result<usize, RosterError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RosterRequest::Count { reply })
            .await
            .map_err(|_| RosterError::Closed)?;
        rx.await.map_err(|_| RosterError::Closed)
    }

    pub async fn broadcast(&self, frame: &str) -> Result<(), RosterError> {
        self.tx
            .send(RosterRequest::Broadcast {
                frame: frame.to_string(),
            })
            .await
            .map_err(|_| RosterError::Closed)
    }

    pub async fn send_to(&self, identities: Vec<String>, frame: &str) -> Result<(), RosterError> {
        self.tx
            .send(RosterRequest::SendTo {
                identities,
                frame: frame.to_string(),
            })
            .await
            .map_err(|_| RosterError::Closed)
    }
}

// ── The loop ─────────────────────────────────────────────────────────────────

/// The roster actor. Owns the maps; nothing else may touch them.
pub struct Roster {
    /// identity → connection handle.
    clients: HashMap<String, ClientHandle>,
    /// External user id → identity (reverse cleanup on leave).
    users: HashMap<String, String>,
    /// identity → external user id, so Leave can clean the secondary index.
    user_ids: HashMap<String, String>,
}

impl Roster {
    /// Spawn the roster loop; returns the submitter handle and the task.
    pub fn spawn() -> (RosterHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(ROSTER_QUEUE_CAPACITY);
        let roster = Roster {
            clients: HashMap::new(),
            users: HashMap::new(),
            user_ids: HashMap::new(),
        };
        let task = tokio::spawn(roster.run(rx));
        (RosterHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RosterRequest>) {
        debug!("roster loop started");
        // recv() drains remaining requests after the last handle drops, so
        // shutdown never loses queued joins or leaves.
        while let Some(req) = rx.recv().await {
            self.apply(req);
        }
        info!(remaining = self.clients.len(), "roster loop stopped");
    }

    fn apply(&mut self, req: RosterRequest) {
        match req {
            RosterRequest::Join {
                client,
                user_id,
                reply,
            } => {
                let _ = reply.send(self.join(client, user_id));
            },
            RosterRequest::Leave { identity } => self.leave(&identity),
            RosterRequest::Kick { identity } => {
                if let Some(client) = self.clients.get(&identity) {
                    client.cancel.cancel();
                }
                self.leave(&identity);
            },
            RosterRequest::IsActive { reply } => {
                let _ = reply.send(!self.clients.is_empty());
            },
            RosterRequest::Count { reply } => {
                let _ = reply.send(self.clients.len());
            },
            RosterRequest::Broadcast { frame } => {
                for client in self.clients.values() {
                    if !client.send(&frame) {
                        warn!(identity = %client.identity, "broadcast to dead client");
                    }
                }
            },
            RosterRequest::SendTo { identities, frame } => {
                for identity in identities {
                    if let Some(client) = self.clients.get(&identity) {
                        if !client.send(&frame) {
                            warn!(identity = %client.identity, "send to dead client");
                        }
                    }
                }
            },
        }
    }

    fn join(&mut self, client: ClientHandle, user_id: String) -> Result<(), RosterError> {
        let identity = client.identity.clone();
        if self.clients.contains_key(&identity) {
            warn!(identity = %identity, "duplicate join rejected");
            return Err(RosterError::DuplicateIdentity(identity));
        }
        debug!(identity = %identity, total = self.clients.len() + 1, "roster join");
        self.users.insert(user_id.clone(), identity.clone());
        self.user_ids.insert(identity.clone(), user_id);
        self.clients.insert(identity, client);
        Ok(())
    }

    fn leave(&mut self, identity: &str) {
        if self.clients.remove(identity).is_none() {
            return;
        }
        if let Some(user_id) = self.user_ids.remove(identity) {
            self.users.remove(&user_id);
        }
        debug!(identity = %identity, total = self.clients.len(), "roster leave");
    }
}
