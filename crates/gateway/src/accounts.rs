//! Boundary to the external account service.
//!
//! The core passes it a username and receives back a stored credential;
//! password storage, hashing policy, and lockout counters all live on the
//! other side of this trait.

use std::collections::HashMap;

use {async_trait::async_trait, tokio::sync::RwLock};

use lunar_auth::{AuthError, Verifier};

/// What the account service knows about one user.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    /// Durable user id, distinct from the session identity.
    pub user_id: String,
    /// Per-user KDF salt, shared with the client at registration.
    pub salt: Vec<u8>,
    /// Expected derived key for this user's secret.
    pub derived_key: Vec<u8>,
}

#[async_trait]
pub trait AccountService: Send + Sync {
    /// Look up a user's stored credential. `None` means unknown user; the
    /// handshake treats unknown and mismatched identically.
    async fn lookup(&self, username: &str) -> Option<StoredCredential>;
}

/// In-memory account store for development and tests.
#[derive(Default)]
pub struct InMemoryAccounts {
    users: RwLock<HashMap<String, StoredCredential>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user by deriving their expected key from a secret.
    pub async fn provision(
        &self,
        verifier: &Verifier,
        username: &str,
        secret: &[u8],
        salt: &[u8],
    ) -> Result<(), AuthError> {
        let derived_key = verifier.derive_key(secret, salt)?.to_vec();
        let cred = StoredCredential {
            user_id: format!("user:{username}"),
            salt: salt.to_vec(),
            derived_key,
        };
        self.users.write().await.insert(username.to_string(), cred);
        Ok(())
    }
}

#[async_trait]
impl AccountService for InMemoryAccounts {
    async fn lookup(&self, username: &str) -> Option<StoredCredential> {
        self.users.read().await.get(username).cloned()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provisioned_user_is_found_with_a_matching_key() {
        let accounts = InMemoryAccounts::new();
        let verifier = Verifier::new();
        accounts
            .provision(&verifier, "uname0", b"browser0secret", b"salt00")
            .await
            .unwrap();

        let cred = accounts.lookup("uname0").await.unwrap();
        assert_eq!(cred.user_id, "user:uname0");
        let presented = verifier.derive_key(b"browser0secret", b"salt00").unwrap();
        assert!(verifier.verify(&presented, &cred.derived_key).is_ok());
    }

    #[tokio::test]
    async fn unknown_user_is_none() {
        let accounts = InMemoryAccounts::new();
        assert!(accounts.lookup("nobody").await.is_none());
    }
}
