use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::defaults::{DEFAULT_HOST, DEFAULT_PORT};

/// Runtime configuration for the gateway listener and state store.
///
/// Assembled once at startup by [`super::Config::load`] from CLI flags, then
/// environment variables, then these defaults. Immutable for the process
/// lifetime: the gateway has no hot-reload surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub state_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    /// Per-session idle timeout / rate-limit hook. Off in v1; reserved for
    /// operators who want to bound misbehaving clients.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            state_dir: default_state_dir(),
            log_dir: None,
            idle_timeout_secs: None,
        }
    }
}

pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(super::defaults::DEFAULT_STATE_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(super::defaults::DEFAULT_STATE_DIR_NAME))
}
