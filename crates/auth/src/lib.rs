//! Credential verification for the gateway handshake.
//!
//! The client derives a key from its secret and per-user salt with a
//! memory-hard KDF and presents the key, never the secret. The server
//! stores the expected key and compares in constant time. Failure is a
//! typed error and mutates nothing; lockout policy belongs to the external
//! account service, not this core.

pub mod token;

pub use token::{Token, TOKEN_TTL_DAYS};

use {
    argon2::{Algorithm, Argon2, Params, Version},
    subtle::ConstantTimeEq,
    tracing::debug,
};

/// Derived-key length in bytes (256 bits).
pub const DERIVED_KEY_LEN: usize = 32;

/// Argon2 time cost (iterations).
pub const TIME_COST: u32 = 3;

/// Argon2 memory cost in KiB (32 MiB).
pub const MEMORY_COST_KIB: u32 = 32 * 1024;

/// Argon2 parallelism (lanes).
pub const LANES: u32 = 4;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Presented key did not match the stored key, or no such user.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// KDF parameter or input rejected by the underlying implementation.
    #[error("key derivation failed: {0}")]
    Kdf(argon2::Error),
}

impl From<argon2::Error> for AuthError {
    fn from(e: argon2::Error) -> Self {
        AuthError::Kdf(e)
    }
}

/// Derives and compares handshake keys. Parameters are fixed at
/// construction; build one and share it.
pub struct Verifier {
    argon2: Argon2<'static>,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier {
    pub fn new() -> Self {
        // Params::new only fails on out-of-range values; these are compile
        // time constants well inside the valid ranges.
        let params = Params::new(MEMORY_COST_KIB, TIME_COST, LANES, Some(DERIVED_KEY_LEN))
            .unwrap_or_else(|_| Params::default());
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Derive the fixed-length key for `(secret, salt)`. Deterministic:
    /// identical inputs always produce the identical key.
    pub fn derive_key(&self, secret: &[u8], salt: &[u8]) -> Result<[u8; DERIVED_KEY_LEN], AuthError> {
        let mut out = [0u8; DERIVED_KEY_LEN];
        self.argon2.hash_password_into(secret, salt, &mut out)?;
        Ok(out)
    }

    /// Constant-time comparison of a presented key against the stored key.
    pub fn verify(&self, presented: &[u8], stored: &[u8]) -> Result<(), AuthError> {
        if presented.len() != stored.len() {
            return Err(AuthError::InvalidCredentials);
        }
        if presented.ct_eq(stored).into() {
            Ok(())
        } else {
            debug!("derived-key mismatch");
            Err(AuthError::InvalidCredentials)
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let v = Verifier::new();
        let a = v.derive_key(b"browser0secret", b"salt00").unwrap();
        let b = v.derive_key(b"browser0secret", b"salt00").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn one_bit_of_secret_changes_the_key() {
        let v = Verifier::new();
        let a = v.derive_key(b"browser0secret", b"salt00").unwrap();
        // Flip the low bit of the first byte ('b' -> 'c').
        let b = v.derive_key(b"crowser0secret", b"salt00").unwrap();
        assert_ne!(a, b);
        // Sampled avalanche check: the keys should differ in many bytes,
        // not just one.
        let differing = a.iter().zip(b.iter()).filter(|(x, y)| x != y).count();
        assert!(differing > DERIVED_KEY_LEN / 2, "only {differing} bytes differ");
    }

    #[test]
    fn salt_changes_the_key() {
        let v = Verifier::new();
        let a = v.derive_key(b"browser0secret", b"salt00").unwrap();
        let b = v.derive_key(b"browser0secret", b"salt01").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn verify_accepts_matching_keys() {
        let v = Verifier::new();
        let key = v.derive_key(b"browser0secret", b"salt00").unwrap();
        assert!(v.verify(&key, &key).is_ok());
    }

    #[test]
    fn verify_rejects_mismatch_and_length_skew() {
        let v = Verifier::new();
        let key = v.derive_key(b"browser0secret", b"salt00").unwrap();
        let other = v.derive_key(b"wrong", b"salt00").unwrap();
        assert!(matches!(
            v.verify(&other, &key),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            v.verify(&key[..16], &key),
            Err(AuthError::InvalidCredentials)
        ));
    }
}
