//! The optional pairing sub-protocol. The gateway is a dumb conduit here:
//! it forwards `pairing_request` frames to the desktop unchanged and routes
//! the desktop's `pairing_response` back to the waiting socket. It never
//! inspects the pairing code itself.

use tracing::info;

use super::protocol::{OutboundEnvelope, PairingResponse};
use super::registry::{Registry, SessionHandle};

/// Forward a pairing request to the currently authenticated desktop,
/// wrapped like any relay envelope. If no desktop is connected, answer the
/// requester directly with `desktop_offline`.
pub fn forward_pairing_request(registry: &Registry, requester: &SessionHandle, raw_request: &str) {
    let desktop = registry.find_desktop();

    match desktop {
        Some(desktop_session) => {
            let payload: serde_json::Value = match serde_json::from_str(raw_request) {
                Ok(v) => v,
                Err(_) => {
                    info!(device_id = %requester.device_id, "dropping malformed pairing_request");
                    return;
                }
            };
            let envelope = OutboundEnvelope {
                sender_device_id: requester.device_id.clone(),
                payload,
            };
            if let Ok(text) = serde_json::to_string(&envelope) {
                desktop_session.send_text(text);
            }
        }
        None => {
            info!(device_id = %requester.device_id, "pairing_request with no desktop connected");
            if let Ok(text) = serde_json::to_string(&PairingResponse::desktop_offline()) {
                requester.send_text(text);
            }
        }
    }
}

/// Route the desktop's `pairing_response` back to the socket that is still
/// waiting on `target_device_id`.
pub fn route_pairing_response(registry: &Registry, target_device_id: &str, response: &PairingResponse) {
    if let Some(target) = registry.lookup(target_device_id) {
        if let Ok(text) = serde_json::to_string(response) {
            target.send_text(text);
        }
    }
}
