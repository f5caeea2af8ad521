//! End-to-end tests covering the handshake, claim, displacement, and relay
//! scenarios against a real gateway server bound to an ephemeral port.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use phbgateway::config::GatewayConfig;
use phbgateway::crypto::{generate_identity, sign};
use phbgateway::gateway::GatewayServer;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start a gateway against a fresh temp state directory and an ephemeral
/// port, returning its ws:// base URL and a shutdown handle.
async fn start_test_gateway() -> (String, broadcast::Sender<()>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = GatewayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        state_dir: dir.path().to_path_buf(),
        log_dir: None,
        idle_timeout_secs: None,
    };

    let server = GatewayServer::start(&config).await.unwrap();
    let state = server.state();
    let shutdown_tx = state.shutdown_tx.clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = phbgateway::gateway::routes::build_routes(state);

    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("ws://127.0.0.1:{}/ws", addr.port()), shutdown_tx, dir)
}

async fn connect(url: &str, device_id: &str) -> WsStream {
    let full = format!("{url}?device_id={device_id}");
    let (ws, _) = connect_async(&full).await.expect("ws connect failed");
    ws
}

async fn recv_json(stream: &mut WsStream) -> serde_json::Value {
    let msg = timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timeout waiting for message")
        .expect("stream ended")
        .expect("ws error");
    match msg {
        Message::Text(text) => serde_json::from_str(&text).expect("invalid JSON"),
        other => panic!("expected text message, got {other:?}"),
    }
}

async fn recv_close(stream: &mut WsStream) -> (u16, String) {
    loop {
        let msg = timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream ended")
            .expect("ws error");
        if let Message::Close(Some(frame)) = msg {
            return (frame.code.into(), frame.reason.to_string());
        }
    }
}

fn claim_response(nonce_hex: &str, kp: &phbgateway::crypto::Keypair) -> serde_json::Value {
    let nonce_bytes = hex::decode(nonce_hex).unwrap();
    json!({
        "type": "auth_response",
        "auth_mode": "desktop_claim",
        "nonce_signature": sign(&kp.signing_key, &nonce_bytes),
        "device_public_key": STANDARD.encode(kp.verifying_key.to_bytes()),
    })
}

fn device_response(
    nonce_hex: &str,
    device_kp: &phbgateway::crypto::Keypair,
    blob: &str,
    desktop_signature: &str,
) -> serde_json::Value {
    let nonce_bytes = hex::decode(nonce_hex).unwrap();
    json!({
        "type": "auth_response",
        "auth_mode": "device",
        "nonce_signature": sign(&device_kp.signing_key, &nonce_bytes),
        "attestation": { "blob": blob, "desktop_signature": desktop_signature },
    })
}

fn make_attestation(
    desktop_kp: &phbgateway::crypto::Keypair,
    device_id: &str,
    device_pub_b64: &str,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
) -> (String, String) {
    let blob = json!({
        "device_id": device_id,
        "device_public_key": device_pub_b64,
        "expires_at": expires_at,
    })
    .to_string();
    let sig = sign(&desktop_kp.signing_key, blob.as_bytes());
    (blob, sig)
}

#[tokio::test]
async fn fresh_claim_succeeds_and_persists_desktop_key() {
    let (url, shutdown, dir) = start_test_gateway().await;
    let mut ws = connect(&url, "desk-1").await;

    let challenge = recv_json(&mut ws).await;
    assert_eq!(challenge["type"], "auth_challenge");
    assert_eq!(challenge["claimed"], false);
    let nonce = challenge["nonce"].as_str().unwrap().to_string();

    let kp = generate_identity();
    ws.send(Message::Text(claim_response(&nonce, &kp).to_string().into()))
        .await
        .unwrap();

    let ack = recv_json(&mut ws).await;
    assert_eq!(ack["type"], "auth_ok");
    assert_eq!(ack["role"], "desktop");
    assert_eq!(ack["device_id"], "desk-1");
    assert!(dir.path().join("desktop.pub").exists());

    let _ = shutdown.send(());
}

#[tokio::test]
async fn device_auth_then_unicast_to_desktop() {
    let (url, shutdown, _dir) = start_test_gateway().await;

    let mut desktop_ws = connect(&url, "desk-1").await;
    let challenge = recv_json(&mut desktop_ws).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();
    let desktop_kp = generate_identity();
    desktop_ws
        .send(Message::Text(
            claim_response(&nonce, &desktop_kp).to_string().into(),
        ))
        .await
        .unwrap();
    let ack = recv_json(&mut desktop_ws).await;
    assert_eq!(ack["type"], "auth_ok");

    let mut phone_ws = connect(&url, "phone-1").await;
    let challenge = recv_json(&mut phone_ws).await;
    assert_eq!(challenge["claimed"], true);
    let nonce = challenge["nonce"].as_str().unwrap().to_string();

    let device_kp = generate_identity();
    let device_pub_b64 = STANDARD.encode(device_kp.verifying_key.to_bytes());
    let (blob, desktop_signature) = make_attestation(&desktop_kp, "phone-1", &device_pub_b64, None);
    phone_ws
        .send(Message::Text(
            device_response(&nonce, &device_kp, &blob, &desktop_signature)
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let ack = recv_json(&mut phone_ws).await;
    assert_eq!(ack["type"], "auth_ok");
    assert_eq!(ack["role"], "device");

    phone_ws
        .send(Message::Text(
            json!({"target_device_id": "desk-1", "payload": {"hello": 1}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    let received = recv_json(&mut desktop_ws).await;
    assert_eq!(received["sender_device_id"], "phone-1");
    assert_eq!(received["payload"]["hello"], 1);

    let _ = shutdown.send(());
}

#[tokio::test]
async fn expired_attestation_is_rejected_before_registration() {
    let (url, shutdown, _dir) = start_test_gateway().await;

    let mut desktop_ws = connect(&url, "desk-1").await;
    let challenge = recv_json(&mut desktop_ws).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();
    let desktop_kp = generate_identity();
    desktop_ws
        .send(Message::Text(
            claim_response(&nonce, &desktop_kp).to_string().into(),
        ))
        .await
        .unwrap();
    recv_json(&mut desktop_ws).await;

    let mut phone_ws = connect(&url, "phone-1").await;
    let challenge = recv_json(&mut phone_ws).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();

    let device_kp = generate_identity();
    let device_pub_b64 = STANDARD.encode(device_kp.verifying_key.to_bytes());
    let past = chrono::Utc::now() - chrono::Duration::days(1);
    let (blob, desktop_signature) =
        make_attestation(&desktop_kp, "phone-1", &device_pub_b64, Some(past));
    phone_ws
        .send(Message::Text(
            device_response(&nonce, &device_kp, &blob, &desktop_signature)
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    let (code, reason) = recv_close(&mut phone_ws).await;
    assert_eq!(code, 4401);
    assert_eq!(reason, "attestation_expired");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn second_auth_for_same_device_id_displaces_the_first() {
    let (url, shutdown, _dir) = start_test_gateway().await;

    let mut desktop_ws = connect(&url, "desk-1").await;
    let challenge = recv_json(&mut desktop_ws).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();
    let desktop_kp = generate_identity();
    desktop_ws
        .send(Message::Text(
            claim_response(&nonce, &desktop_kp).to_string().into(),
        ))
        .await
        .unwrap();
    recv_json(&mut desktop_ws).await;

    let device_kp = generate_identity();
    let device_pub_b64 = STANDARD.encode(device_kp.verifying_key.to_bytes());
    let (blob, desktop_signature) = make_attestation(&desktop_kp, "phone-1", &device_pub_b64, None);

    let mut phone_ws_1 = connect(&url, "phone-1").await;
    let challenge = recv_json(&mut phone_ws_1).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();
    phone_ws_1
        .send(Message::Text(
            device_response(&nonce, &device_kp, &blob, &desktop_signature)
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let ack = recv_json(&mut phone_ws_1).await;
    assert_eq!(ack["type"], "auth_ok");

    let mut phone_ws_2 = connect(&url, "phone-1").await;
    let challenge = recv_json(&mut phone_ws_2).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();
    phone_ws_2
        .send(Message::Text(
            device_response(&nonce, &device_kp, &blob, &desktop_signature)
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let ack = recv_json(&mut phone_ws_2).await;
    assert_eq!(ack["type"], "auth_ok");

    let (code, reason) = recv_close(&mut phone_ws_1).await;
    assert_eq!(code, 4409);
    assert_eq!(reason, "superseded");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn broadcast_excludes_sender() {
    let (url, shutdown, _dir) = start_test_gateway().await;

    let mut desktop_ws = connect(&url, "desk-1").await;
    let challenge = recv_json(&mut desktop_ws).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();
    let desktop_kp = generate_identity();
    desktop_ws
        .send(Message::Text(
            claim_response(&nonce, &desktop_kp).to_string().into(),
        ))
        .await
        .unwrap();
    recv_json(&mut desktop_ws).await;

    async fn auth_device(
        url: &str,
        device_id: &str,
        desktop_kp: &phbgateway::crypto::Keypair,
    ) -> WsStream {
        let mut ws = connect(url, device_id).await;
        let challenge = recv_json(&mut ws).await;
        let nonce = challenge["nonce"].as_str().unwrap().to_string();
        let device_kp = generate_identity();
        let device_pub_b64 = STANDARD.encode(device_kp.verifying_key.to_bytes());
        let (blob, desktop_signature) = make_attestation(desktop_kp, device_id, &device_pub_b64, None);
        ws.send(Message::Text(
            device_response(&nonce, &device_kp, &blob, &desktop_signature)
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
        recv_json(&mut ws).await;
        ws
    }

    let mut phone_1 = auth_device(&url, "phone-1", &desktop_kp).await;
    let mut phone_2 = auth_device(&url, "phone-2", &desktop_kp).await;

    phone_1
        .send(Message::Text(
            json!({"payload": {"ping": true}}).to_string().into(),
        ))
        .await
        .unwrap();

    let on_desktop = recv_json(&mut desktop_ws).await;
    assert_eq!(on_desktop["sender_device_id"], "phone-1");

    let on_phone_2 = recv_json(&mut phone_2).await;
    assert_eq!(on_phone_2["sender_device_id"], "phone-1");

    let nothing = timeout(Duration::from_millis(200), phone_1.next()).await;
    assert!(nothing.is_err(), "sender should not receive its own broadcast");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn reclaim_is_rejected_and_desktop_pub_is_unchanged() {
    let (url, shutdown, dir) = start_test_gateway().await;

    let mut desktop_ws = connect(&url, "desk-1").await;
    let challenge = recv_json(&mut desktop_ws).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();
    let kp1 = generate_identity();
    desktop_ws
        .send(Message::Text(claim_response(&nonce, &kp1).to_string().into()))
        .await
        .unwrap();
    recv_json(&mut desktop_ws).await;

    let before = std::fs::read_to_string(dir.path().join("desktop.pub")).unwrap();

    let mut impostor_ws = connect(&url, "desk-2").await;
    let challenge = recv_json(&mut impostor_ws).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();
    assert_eq!(challenge["claimed"], true);
    let kp2 = generate_identity();
    impostor_ws
        .send(Message::Text(claim_response(&nonce, &kp2).to_string().into()))
        .await
        .unwrap();

    let (code, reason) = recv_close(&mut impostor_ws).await;
    assert_eq!(code, 4403);
    assert_eq!(reason, "already_claimed");

    let after = std::fs::read_to_string(dir.path().join("desktop.pub")).unwrap();
    assert_eq!(before, after);

    let _ = shutdown.send(());
}

#[tokio::test]
async fn missing_device_id_closes_before_any_challenge() {
    let (url, shutdown, _dir) = start_test_gateway().await;

    let (ws, _) = connect_async(&url).await.expect("ws connect failed");
    let (_tx, mut rx) = ws.split();

    let msg = timeout(Duration::from_secs(5), rx.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match msg {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 4400);
            assert_eq!(frame.reason, "missing_device_id");
        }
        other => panic!("expected an immediate close frame, got {other:?}"),
    }

    let _ = shutdown.send(());
}

#[tokio::test]
async fn unknown_relay_target_is_dropped_without_closing_sender() {
    let (url, shutdown, _dir) = start_test_gateway().await;

    let mut desktop_ws = connect(&url, "desk-1").await;
    let challenge = recv_json(&mut desktop_ws).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();
    let kp = generate_identity();
    desktop_ws
        .send(Message::Text(claim_response(&nonce, &kp).to_string().into()))
        .await
        .unwrap();
    recv_json(&mut desktop_ws).await;

    desktop_ws
        .send(Message::Text(
            json!({"target_device_id": "nobody-home", "payload": {}})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    // The sender stays open and can still be pinged/used afterward.
    desktop_ws
        .send(Message::Text(json!({"payload": {"ping": true}}).to_string().into()))
        .await
        .unwrap();

    let _ = shutdown.send(());
}

#[tokio::test]
async fn pairing_request_with_no_desktop_connected_yields_desktop_offline() {
    let (url, shutdown, _dir) = start_test_gateway().await;

    // Claim the gateway, then let the desktop disconnect so a previously
    // paired device can still authenticate while the desktop is offline.
    let mut desktop_ws = connect(&url, "desk-1").await;
    let challenge = recv_json(&mut desktop_ws).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();
    let desktop_kp = generate_identity();
    desktop_ws
        .send(Message::Text(
            claim_response(&nonce, &desktop_kp).to_string().into(),
        ))
        .await
        .unwrap();
    recv_json(&mut desktop_ws).await;
    drop(desktop_ws);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut phone_ws = connect(&url, "phone-1").await;
    let challenge = recv_json(&mut phone_ws).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();
    let device_kp = generate_identity();
    let device_pub_b64 = STANDARD.encode(device_kp.verifying_key.to_bytes());
    let (blob, desktop_signature) = make_attestation(&desktop_kp, "phone-1", &device_pub_b64, None);
    phone_ws
        .send(Message::Text(
            device_response(&nonce, &device_kp, &blob, &desktop_signature)
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let ack = recv_json(&mut phone_ws).await;
    assert_eq!(ack["type"], "auth_ok");

    phone_ws
        .send(Message::Text(
            json!({"type": "pairing_request", "pairing_code": "123456", "device_public_key": "x", "device_id": "new-phone", "nonce_signature": "x"})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

    // No desktop is connected, so the gateway answers the requester directly.
    let response = recv_json(&mut phone_ws).await;
    assert_eq!(response["status"], "rejected");
    assert_eq!(response["reason"], "desktop_offline");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn pairing_request_is_forwarded_and_response_routed_back() {
    let (url, shutdown, _dir) = start_test_gateway().await;

    let mut desktop_ws = connect(&url, "desk-1").await;
    let challenge = recv_json(&mut desktop_ws).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();
    let desktop_kp = generate_identity();
    desktop_ws
        .send(Message::Text(
            claim_response(&nonce, &desktop_kp).to_string().into(),
        ))
        .await
        .unwrap();
    recv_json(&mut desktop_ws).await;

    let mut phone_ws = connect(&url, "phone-1").await;
    let challenge = recv_json(&mut phone_ws).await;
    let nonce = challenge["nonce"].as_str().unwrap().to_string();
    let device_kp = generate_identity();
    let device_pub_b64 = STANDARD.encode(device_kp.verifying_key.to_bytes());
    let (blob, desktop_signature) = make_attestation(&desktop_kp, "phone-1", &device_pub_b64, None);
    phone_ws
        .send(Message::Text(
            device_response(&nonce, &device_kp, &blob, &desktop_signature)
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let ack = recv_json(&mut phone_ws).await;
    assert_eq!(ack["type"], "auth_ok");

    phone_ws
        .send(Message::Text(
            json!({
                "type": "pairing_request",
                "pairing_code": "654321",
                "device_public_key": "second-device-pubkey",
                "device_id": "phone-2",
                "nonce_signature": "sig",
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let forwarded = recv_json(&mut desktop_ws).await;
    assert_eq!(forwarded["sender_device_id"], "phone-1");
    assert_eq!(forwarded["payload"]["pairing_code"], "654321");
    assert_eq!(forwarded["payload"]["device_id"], "phone-2");

    let second_device_kp = generate_identity();
    let second_device_pub_b64 = STANDARD.encode(second_device_kp.verifying_key.to_bytes());
    let (blob, desktop_signature) =
        make_attestation(&desktop_kp, "phone-2", &second_device_pub_b64, None);

    desktop_ws
        .send(Message::Text(
            json!({
                "type": "pairing_response",
                "status": "accepted",
                "device_id": "phone-1",
                "attestation": { "blob": blob, "desktop_signature": desktop_signature },
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let routed = recv_json(&mut phone_ws).await;
    assert_eq!(routed["status"], "accepted");
    assert_eq!(routed["attestation"]["blob"], blob);

    let _ = shutdown.send(());
}
