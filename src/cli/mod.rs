use std::path::PathBuf;

use clap::Parser;

/// Start the trust-anchored WebSocket relay.
#[derive(Parser)]
#[command(name = "phbgateway", version, about = "Household device relay gateway")]
pub struct ServeArgs {
    /// Bind address.
    #[arg(long)]
    pub host: Option<String>,
    /// TCP port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Directory holding the gateway identity and desktop binding.
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
    /// Directory to append a persistent log file into.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}
