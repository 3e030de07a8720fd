//! Configuration loading for the lunar gateway.
//!
//! A single optional `lunar.toml`, discovered project-local first and then
//! in `~/.config/lunar/`. A missing or unparsable file falls back to
//! defaults with a warning; startup never fails on config.

pub mod loader;
pub mod schema;

pub use loader::{discover_and_load, load_config};
pub use schema::{AuthConfig, GatewayConfig, LimitsConfig, LunarConfig};
