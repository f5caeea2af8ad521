//! Wire types exchanged between the gateway and its connected sockets.
//!
//! Handshake shapes are tagged on `type`; relay envelopes carry no tag at
//! all (they're distinguished by connection state, not by a `type` field).

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

pub const MAX_FRAME_BYTES: usize = crate::config::MAX_FRAME_BYTES;
pub const HANDSHAKE_TIMEOUT_SECS: u64 = crate::config::HANDSHAKE_TIMEOUT_SECS;

/// Sent immediately on socket accept.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AuthChallenge {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub nonce: String,
    pub gateway_public_key: String,
    pub claimed: bool,
}

impl AuthChallenge {
    pub fn new(nonce: String, gateway_public_key: String, claimed: bool) -> Self {
        Self {
            frame_type: "auth_challenge",
            nonce,
            gateway_public_key,
            claimed,
        }
    }
}

/// The attestation a device presents: the desktop-signed blob plus the
/// desktop's signature over the *exact* blob bytes received on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct AttestationFrame {
    pub blob: String,
    pub desktop_signature: String,
}

/// The parsed contents of an attestation blob.
#[derive(Debug, Clone, Deserialize)]
pub struct AttestationBlob {
    pub device_id: String,
    pub device_public_key: String,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Client's reply to the auth challenge. `auth_mode` selects which optional
/// fields are required; unused fields for a given mode are simply absent.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub auth_mode: String,
    pub nonce_signature: String,
    #[serde(default)]
    pub device_public_key: Option<String>,
    #[serde(default)]
    pub attestation: Option<AttestationFrame>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthOk {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub role: &'static str,
    pub device_id: String,
}

impl AuthOk {
    pub fn new(role: &'static str, device_id: String) -> Self {
        Self {
            frame_type: "auth_ok",
            role,
            device_id,
        }
    }
}

/// An inbound relay frame from an authenticated sender.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default)]
    pub target_device_id: Option<String>,
    pub payload: serde_json::Value,
}

/// An outbound relay frame. `sender_device_id` is always gateway-assigned.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEnvelope {
    pub sender_device_id: String,
    pub payload: serde_json::Value,
}

/// The desktop's answer to a pairing request, routed back to the waiting
/// socket unchanged.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PairingResponse {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<AttestationFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PairingResponse {
    pub fn desktop_offline() -> Self {
        Self {
            frame_type: "pairing_response".to_string(),
            status: "rejected".to_string(),
            attestation: None,
            reason: Some("desktop_offline".to_string()),
        }
    }
}

/// Parses `raw` as a JSON object and, if it carries `"type":"pairing_request"`,
/// returns the attached raw value so the caller can forward it byte-for-byte
/// without re-serializing (attestations elsewhere depend on exact bytes; the
/// same discipline is applied here for consistency).
pub fn parse_pairing_request(raw: &str) -> Option<&RawValue> {
    let value: &RawValue = serde_json::from_str(raw).ok()?;
    let probe: serde_json::Value = serde_json::from_str(value.get()).ok()?;
    if probe.get("type")?.as_str()? == "pairing_request" {
        Some(value)
    } else {
        None
    }
}

/// Close codes used on handshake failure (§6 of the specification this
/// implements).
pub mod close_code {
    pub const MISSING_DEVICE_ID: u16 = 4400;
    pub const AUTH_FAILED: u16 = 4401;
    pub const ALREADY_CLAIMED: u16 = 4403;
    pub const SUPERSEDED: u16 = 4409;
    pub const FRAME_TOO_LARGE: u16 = 1009;
    pub const GOING_AWAY: u16 = 1001;
    pub const INTERNAL_ERROR: u16 = 1011;
}
