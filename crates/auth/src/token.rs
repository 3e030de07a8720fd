use {
    time::{Duration, OffsetDateTime},
    uuid::Uuid,
};

/// Default lifetime of a session token.
pub const TOKEN_TTL_DAYS: i64 = 21;

/// An opaque session credential bound to one identity.
///
/// Expiry is independent of the connection: an expired token does not kill
/// the transport, it only invalidates the long-term identity claim; the
/// account service must reissue.
#[derive(Debug, Clone)]
pub struct Token {
    pub value: String,
    pub valid: bool,
    pub expires_at: OffsetDateTime,
    /// Durable user id from the account service, if one exists.
    pub user_id: String,
}

impl Token {
    /// Mint a fresh session token for `user_id`.
    pub fn mint(user_id: &str, ttl: Duration) -> Self {
        Self {
            value: Uuid::new_v4().to_string(),
            valid: true,
            expires_at: OffsetDateTime::now_utc() + ttl,
            user_id: user_id.to_string(),
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Valid flag AND unexpired.
    pub fn is_usable(&self, now: OffsetDateTime) -> bool {
        self.valid && !self.is_expired(now)
    }

    /// Mark the token revoked. Revocation is one-way.
    pub fn revoke(&mut self) {
        self.valid = false;
    }
}
