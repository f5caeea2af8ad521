//! Per-connection task: handshake timeout, the auth state machine, and the
//! relay/pairing loop once authenticated.
//!
//! Every socket has exactly one reader (this task) and one writer: all
//! outbound frames are funneled through an `mpsc` channel drained by a
//! dedicated writer task, so sends are strictly FIFO per socket even though
//! multiple other tasks (relay, pairing, displacement) may enqueue onto it
//! concurrently.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::gateway::auth::{self, Role};
use crate::gateway::protocol::{
    close_code, parse_pairing_request, AuthChallenge, AuthOk, AuthResponse, PairingResponse,
    HANDSHAKE_TIMEOUT_SECS,
};
use crate::gateway::registry::{OutboundMessage, SessionHandle};
use crate::gateway::relay;
use crate::gateway::server::GatewayState;
use crate::{crypto, gateway::pairing};

pub async fn handle_connection(socket: WebSocket, state: GatewayState, device_id: Option<String>) {
    let Some(device_id) = device_id.filter(|d| !d.is_empty()) else {
        close_before_auth(socket, close_code::MISSING_DEVICE_ID, "missing_device_id").await;
        return;
    };

    let (mut ws_tx, mut ws_rx) = socket.split();

    let nonce = crypto::random_nonce();
    let challenge = AuthChallenge::new(
        nonce.clone(),
        state.store.gateway_public_key_base64(),
        state.store.is_claimed(),
    );
    if send_json(&mut ws_tx, &challenge).await.is_err() {
        return;
    }

    let response = match tokio::time::timeout(
        std::time::Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        recv_auth_response(&mut ws_rx),
    )
    .await
    {
        Ok(Some(response)) => response,
        Ok(None) => return, // socket closed or errored mid-handshake
        Err(_) => {
            send_close(&mut ws_tx, close_code::AUTH_FAILED, "auth_timeout").await;
            return;
        }
    };

    let authenticated = match auth::authenticate(&state.store, &device_id, &nonce, &response) {
        Ok(a) => a,
        Err(e) => {
            warn!(%device_id, reason = %e, "handshake rejected");
            send_close(&mut ws_tx, e.close_code(), e.reason()).await;
            return;
        }
    };

    let session_id = crate::gateway::registry::next_session_id();
    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(64);
    let session = SessionHandle::new(
        session_id,
        authenticated.device_id.clone(),
        authenticated.role,
        outbound_tx,
    );

    info!(
        device_id = %authenticated.device_id,
        role = authenticated.role.as_str(),
        session_id,
        "session authenticated"
    );

    let ack = AuthOk::new(authenticated.role.as_str(), authenticated.device_id.clone());
    if send_json(&mut ws_tx, &ack).await.is_err() {
        return;
    }

    // register() may close a pre-existing session for this device_id before
    // the writer task below is even spawned; that's fine, the writer for
    // the displaced session is its own task, independent of this one.
    state.registry.register(session.clone());

    let writer = tokio::spawn(writer_task(ws_tx, outbound_rx));

    reader_loop(&mut ws_rx, &state, &session).await;

    state.registry.unregister(&session.device_id, session_id);
    drop(session); // drop the sender half so the writer task exits
    let _ = writer.await;
}

async fn reader_loop(
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
    state: &GatewayState,
    session: &SessionHandle,
) {
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let text: &str = &text;
                if text.len() > crate::gateway::protocol::MAX_FRAME_BYTES {
                    session.close(close_code::FRAME_TOO_LARGE, "frame too large");
                    return;
                }
                dispatch_frame(state, session, text);
            }
            Ok(Message::Close(_)) => return,
            Ok(Message::Binary(bytes)) => {
                if bytes.len() > crate::gateway::protocol::MAX_FRAME_BYTES {
                    session.close(close_code::FRAME_TOO_LARGE, "frame too large");
                    return;
                }
                // Binary frames are not part of the wire protocol; drop.
            }
            Ok(_) => {}
            Err(e) => {
                warn!(device_id = %session.device_id, error = %e, "transport error, closing session");
                return;
            }
        }
    }
}

fn dispatch_frame(state: &GatewayState, session: &SessionHandle, text: &str) {
    if let Some(raw_pairing_request) = parse_pairing_request(text) {
        pairing::forward_pairing_request(&state.registry, session, raw_pairing_request.get());
        return;
    }

    if session.role == Role::Desktop {
        if let Ok(response) = serde_json::from_str::<PairingResponse>(text) {
            if response.frame_type == "pairing_response" {
                if let Some(target) = pairing_target(text) {
                    pairing::route_pairing_response(&state.registry, &target, &response);
                    return;
                }
            }
        }
    }

    relay::handle_relay_frame(&state.registry, session, text);
}

/// `pairing_response` frames carry their destination out-of-band in a
/// `device_id` field alongside `status`/`attestation`; pull it out without
/// committing it to the typed struct (it's routing metadata, not protocol).
fn pairing_target(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("device_id")?.as_str().map(str::to_string)
}

async fn recv_auth_response(
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
) -> Option<AuthResponse> {
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<AuthResponse>(&text) {
                Ok(response) => return Some(response),
                Err(_) => {
                    return Some(AuthResponse {
                        auth_mode: String::new(),
                        nonce_signature: String::new(),
                        device_public_key: None,
                        attestation: None,
                    });
                }
            },
            Ok(Message::Close(_)) => return None,
            Err(_) => return None,
            _ => {}
        }
    }
    None
}

async fn writer_task(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
) {
    while let Some(msg) = outbound_rx.recv().await {
        match msg {
            OutboundMessage::Text(text) => {
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            OutboundMessage::Close { code, reason } => {
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                let _ = ws_tx.close().await;
                return;
            }
        }
    }
}

async fn send_json<T: serde::Serialize>(
    ws_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), ()> {
    let text = serde_json::to_string(value).map_err(|_| ())?;
    ws_tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn send_close(
    ws_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) {
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
    let _ = ws_tx.close().await;
}

async fn close_before_auth(socket: WebSocket, code: u16, reason: &str) {
    let (mut ws_tx, _ws_rx) = socket.split();
    send_close(&mut ws_tx, code, reason).await;
}
