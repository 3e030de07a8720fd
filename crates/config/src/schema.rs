use serde::{Deserialize, Serialize};

use {
    lunar_auth::TOKEN_TTL_DAYS,
    lunar_protocol::{LIVENESS_DEADLINE_SECS, MAX_FRAME_BYTES},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LunarConfig {
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub limits: LimitsConfig,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8795,
        }
    }
}

/// Handshake and token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Session token lifetime in days.
    pub token_ttl_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_days: TOKEN_TTL_DAYS,
        }
    }
}

/// Transport limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum accepted inbound frame size in bytes.
    pub max_frame_bytes: usize,
    /// Seconds without inbound traffic before a connection is dead.
    pub liveness_deadline_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: MAX_FRAME_BYTES,
            liveness_deadline_secs: LIVENESS_DEADLINE_SECS,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    // Tuning knobs default to the wire-level constants; a drift between
    // the two is a bug, not a second source of truth.
    #[test]
    fn defaults_track_the_protocol_constants() {
        let cfg = LunarConfig::default();
        assert_eq!(cfg.limits.max_frame_bytes, MAX_FRAME_BYTES);
        assert_eq!(cfg.limits.liveness_deadline_secs, LIVENESS_DEADLINE_SECS);
        assert_eq!(cfg.auth.token_ttl_days, TOKEN_TTL_DAYS);
    }
}
