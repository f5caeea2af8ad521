use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::GatewayConfig;
use crate::gateway::registry::Registry;
use crate::gateway::routes;
use crate::store::StateStore;

/// Shared state handed to every connection task.
#[derive(Clone)]
pub struct GatewayState {
    pub store: Arc<StateStore>,
    pub registry: Arc<Registry>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub start_time: std::time::Instant,
    pub version: String,
}

/// The gateway server.
pub struct GatewayServer {
    state: GatewayState,
    addr: SocketAddr,
}

impl GatewayServer {
    /// Start the gateway server with the given configuration: loads (or
    /// creates) the persistent identity, binds the listening socket does
    /// not happen here — that's `run_until_shutdown`, so tests can inspect
    /// `addr()` against an ephemeral port before serving.
    pub async fn start(config: &GatewayConfig) -> Result<Self> {
        let store = StateStore::load_or_init(&config.state_dir)?;
        let registry = Registry::new();
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        let state = GatewayState {
            store: Arc::new(store),
            registry,
            shutdown_tx,
            start_time: std::time::Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

        Ok(Self { state, addr })
    }

    /// Run the server until a shutdown signal is received, then give
    /// connected sessions up to `SHUTDOWN_GRACE_SECS` to close cleanly.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let state = self.state.clone();
        let app = build_router(state.clone());

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!(
            version = %state.version,
            addr = %self.addr,
            claimed = state.store.is_claimed(),
            "gateway listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(state.shutdown_tx.clone()))
            .await?;

        close_remaining_sessions(&state).await;
        info!("gateway shut down gracefully");
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> GatewayState {
        self.state.clone()
    }

    /// Trigger graceful shutdown (used by tests and embedders).
    pub fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(());
    }
}

fn build_router(state: GatewayState) -> Router {
    routes::build_routes(state)
}

/// Send every still-connected session a "going away" close frame and give
/// them up to `SHUTDOWN_GRACE_SECS` to actually close.
async fn close_remaining_sessions(state: &GatewayState) {
    for session in state.registry.broadcast_targets(0) {
        session.close(
            crate::gateway::protocol::close_code::GOING_AWAY,
            "going away",
        );
    }
    tokio::time::sleep(Duration::from_secs(crate::config::SHUTDOWN_GRACE_SECS)).await;
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received ctrl-c, initiating shutdown");
        }
        _ = terminate => {
            info!("received sigterm, initiating shutdown");
        }
    }

    let _ = shutdown_tx.send(());
}
