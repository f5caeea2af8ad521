//! The relay engine: turns a frame from an authenticated sender into an
//! outbound envelope and dispatches it by `target_device_id` (unicast) or
//! to every other authenticated session (broadcast).

use tracing::{debug, info};

use super::protocol::{InboundEnvelope, OutboundEnvelope};
use super::registry::{Registry, SessionHandle};

/// Handle one relay-phase frame from `sender`. `raw` is the exact text
/// frame the socket received; non-JSON or non-object frames are dropped
/// and logged, never treated as a protocol violation worth closing over.
pub fn handle_relay_frame(registry: &Registry, sender: &SessionHandle, raw: &str) {
    let envelope: InboundEnvelope = match serde_json::from_str(raw) {
        Ok(env) => env,
        Err(e) => {
            debug!(device_id = %sender.device_id, error = %e, "dropping malformed relay frame");
            return;
        }
    };

    let outbound = OutboundEnvelope {
        sender_device_id: sender.device_id.clone(),
        payload: envelope.payload,
    };
    let text = match serde_json::to_string(&outbound) {
        Ok(t) => t,
        Err(e) => {
            debug!(error = %e, "failed to serialize outbound envelope");
            return;
        }
    };

    match envelope.target_device_id {
        Some(target) => match registry.lookup(&target) {
            Some(target_session) => target_session.send_text(text),
            None => {
                info!(from = %sender.device_id, target = %target, "relay target not connected, dropping");
            }
        },
        None => {
            for peer in registry.broadcast_targets(sender.session_id) {
                peer.send_text(text.clone());
            }
        }
    }
}
