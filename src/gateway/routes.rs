use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::gateway::protocol::MAX_FRAME_BYTES;
use crate::gateway::server::GatewayState;
use crate::gateway::websocket;

/// Build the gateway's small HTTP surface: the WebSocket upgrade path and a
/// health check. Non-upgrade requests to `/ws` fall through to axum's
/// default 400 handling for a missing `Upgrade` header.
pub fn build_routes(state: GatewayState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    uptime_seconds: u64,
    claimed: bool,
    connections: usize,
}

async fn health_handler(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        claimed: state.store.is_claimed(),
        connections: state.registry.len(),
    })
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    device_id: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    debug!(device_id = ?query.device_id, "websocket upgrade request");
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| websocket::handle_connection(socket, state, query.device_id))
}
