/// Default configuration constants used across the gateway.

/// Default bind host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8765;

/// Default state directory name, resolved under the user's home directory.
pub const DEFAULT_STATE_DIR_NAME: &str = ".phbgateway";

/// Handshake timeout: time allowed between socket accept and AUTHENTICATED.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 20;

/// Maximum accepted WebSocket frame size, in bytes.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

/// Grace period the listener waits for in-flight sessions to close during shutdown.
pub const SHUTDOWN_GRACE_SECS: u64 = 2;
