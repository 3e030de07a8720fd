use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::schema::LunarConfig;

/// Standard config file name.
const CONFIG_FILENAME: &str = "lunar.toml";

/// Load config from the given path.
pub fn load_config(path: &Path) -> Result<LunarConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./lunar.toml` (project-local)
/// 2. `~/.config/lunar/lunar.toml` (user-global)
///
/// Returns `LunarConfig::default()` if no config file is found or the file
/// fails to parse.
pub fn discover_and_load() -> LunarConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return LunarConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "failed to load config, using defaults");
            LunarConfig::default()
        },
    }
}

fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILENAME);
    if local.exists() {
        return Some(local);
    }
    let global = dirs_next::home_dir()?.join(".config").join("lunar").join(CONFIG_FILENAME);
    if global.exists() {
        return Some(global);
    }
    None
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_partial_file_with_defaults_filled_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lunar.toml");
        std::fs::write(&path, "[gateway]\nport = 9000\n").unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.gateway.port, 9000);
        assert_eq!(cfg.gateway.bind, "127.0.0.1");
        assert_eq!(cfg.auth.token_ttl_days, 21);
        assert_eq!(cfg.limits.max_frame_bytes, 1024);
    }

    #[test]
    fn parse_failure_is_a_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lunar.toml");
        std::fs::write(&path, "gateway = 12").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            load_config(Path::new("/nonexistent/lunar.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
