mod defaults;
mod types;

pub use defaults::*;
pub use types::*;

use std::path::PathBuf;

use tracing::info;

use crate::cli::ServeArgs;

impl GatewayConfig {
    /// Assemble configuration from CLI flags, environment overrides, then
    /// built-in defaults, and ensure the state directory exists.
    pub fn load(args: &ServeArgs) -> anyhow::Result<Self> {
        let mut config = GatewayConfig::default();

        if let Ok(host) = std::env::var("PHBGATEWAY_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("PHBGATEWAY_PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(dir) = std::env::var("PHBGATEWAY_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("PHBGATEWAY_LOG_DIR") {
            config.log_dir = Some(PathBuf::from(dir));
        }

        // CLI flags take precedence over environment and defaults.
        if let Some(host) = &args.host {
            config.host = host.clone();
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(dir) = &args.state_dir {
            config.state_dir = dir.clone();
        }
        if let Some(dir) = &args.log_dir {
            config.log_dir = Some(dir.clone());
        }

        std::fs::create_dir_all(&config.state_dir)?;
        if let Some(log_dir) = &config.log_dir {
            std::fs::create_dir_all(log_dir)?;
        }

        info!(
            host = %config.host,
            port = config.port,
            state_dir = %config.state_dir.display(),
            "resolved gateway configuration"
        );

        Ok(config)
    }
}
