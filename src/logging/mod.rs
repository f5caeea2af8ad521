use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging. When `log_dir` is set, a second layer
/// appends the same events to `<log_dir>/gateway.log` alongside stdout; there
/// is no rotation, matching the rest of this codebase's lack of a
/// log-rotation dependency.
pub fn init(log_dir: Option<&Path>) {
    let filter = EnvFilter::from_default_env().add_directive("phbgateway=info".parse().unwrap());
    let stdout_layer = fmt::layer();

    match log_dir {
        Some(dir) => {
            let log_path = dir.join("gateway.log");
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
            {
                Ok(file) => {
                    let file_layer = fmt::layer()
                        .with_ansi(false)
                        .with_writer(move || file.try_clone().expect("clone log file handle"));
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(stdout_layer)
                        .with(file_layer)
                        .init();
                }
                Err(e) => {
                    tracing_subscriber::registry().with(filter).with(stdout_layer).init();
                    tracing::warn!(error = %e, path = %log_path.display(), "failed to open log file, logging to stdout only");
                }
            }
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stdout_layer).init();
        }
    }
}
