//! The per-connection authentication state machine.
//!
//! This module is deliberately free of any socket I/O: [`authenticate`]
//! takes the parsed [`AuthResponse`], the nonce the gateway issued for this
//! connection, the `device_id` from the query string, and the shared
//! [`StateStore`], and returns either an [`AuthOutcome::Authenticated`] or
//! an [`AuthOutcome::Rejected`] with a close code and reason. The websocket
//! task (see `gateway::websocket`) owns the timeout, the actual send/close,
//! and registry interaction.

use chrono::Utc;
use thiserror::Error;

use crate::crypto;
use crate::store::StateStore;

use super::protocol::{close_code, AttestationBlob, AuthResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Desktop,
    Device,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Desktop => "desktop",
            Role::Device => "device",
        }
    }
}

#[derive(Debug)]
pub struct Authenticated {
    pub device_id: String,
    pub role: Role,
    pub device_public_key: Option<ed25519_dalek::VerifyingKey>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed auth response")]
    MalformedFrame,
    #[error("unknown auth_mode")]
    UnknownAuthMode,
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("attestation device_id does not match connection device_id")]
    AttestationDeviceIdMismatch,
    #[error("attestation has expired")]
    AttestationExpired,
    #[error("gateway is already claimed")]
    AlreadyClaimed,
}

impl AuthError {
    pub fn close_code(&self) -> u16 {
        match self {
            AuthError::AlreadyClaimed => close_code::ALREADY_CLAIMED,
            _ => close_code::AUTH_FAILED,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MalformedFrame => "auth_failed",
            AuthError::UnknownAuthMode => "auth_failed",
            AuthError::SignatureInvalid => "auth_failed",
            AuthError::AttestationDeviceIdMismatch => "auth_failed",
            AuthError::AttestationExpired => "attestation_expired",
            AuthError::AlreadyClaimed => "already_claimed",
        }
    }
}

/// Run the three `auth_mode` branches against an already-parsed response.
///
/// `device_id` is the value from the connection's `?device_id=` query
/// parameter; `nonce_hex` is the nonce this connection's challenge carried.
pub fn authenticate(
    store: &StateStore,
    device_id: &str,
    nonce_hex: &str,
    response: &AuthResponse,
) -> Result<Authenticated, AuthError> {
    let nonce_bytes = hex::decode(nonce_hex).map_err(|_| AuthError::MalformedFrame)?;

    match response.auth_mode.as_str() {
        "desktop_claim" => claim(store, device_id, &nonce_bytes, response),
        "desktop" => auth_desktop(store, device_id, &nonce_bytes, response),
        "device" => auth_device(store, device_id, &nonce_bytes, response),
        _ => Err(AuthError::UnknownAuthMode),
    }
}

fn claim(
    store: &StateStore,
    device_id: &str,
    nonce_bytes: &[u8],
    response: &AuthResponse,
) -> Result<Authenticated, AuthError> {
    if store.is_claimed() {
        return Err(AuthError::AlreadyClaimed);
    }

    let device_public_key = response
        .device_public_key
        .as_deref()
        .ok_or(AuthError::MalformedFrame)?;

    if !crypto::verify(device_public_key, nonce_bytes, &response.nonce_signature) {
        return Err(AuthError::SignatureInvalid);
    }

    let verifying_key =
        crypto::decode_public_key(device_public_key).ok_or(AuthError::MalformedFrame)?;

    store
        .bind_desktop(verifying_key)
        .map_err(|_| AuthError::AlreadyClaimed)?;

    Ok(Authenticated {
        device_id: device_id.to_string(),
        role: Role::Desktop,
        device_public_key: Some(verifying_key),
    })
}

fn auth_desktop(
    store: &StateStore,
    device_id: &str,
    nonce_bytes: &[u8],
    response: &AuthResponse,
) -> Result<Authenticated, AuthError> {
    let desktop_key = store.get_desktop_public_key().ok_or(AuthError::SignatureInvalid)?;

    if !crypto::verify_with_key(&desktop_key, nonce_bytes, &response.nonce_signature) {
        return Err(AuthError::SignatureInvalid);
    }

    Ok(Authenticated {
        device_id: device_id.to_string(),
        role: Role::Desktop,
        device_public_key: Some(desktop_key),
    })
}

fn auth_device(
    store: &StateStore,
    device_id: &str,
    nonce_bytes: &[u8],
    response: &AuthResponse,
) -> Result<Authenticated, AuthError> {
    let desktop_key = store.get_desktop_public_key().ok_or(AuthError::SignatureInvalid)?;
    let attestation = response.attestation.as_ref().ok_or(AuthError::MalformedFrame)?;

    // The blob must be verified over the exact bytes received on the wire;
    // `attestation.blob` is the raw string field as deserialized, never
    // re-encoded, so this is safe to hash/verify directly.
    if !crypto::verify_with_key(
        &desktop_key,
        attestation.blob.as_bytes(),
        &attestation.desktop_signature,
    ) {
        return Err(AuthError::SignatureInvalid);
    }

    let blob: AttestationBlob =
        serde_json::from_str(&attestation.blob).map_err(|_| AuthError::MalformedFrame)?;

    if blob.device_id != device_id {
        return Err(AuthError::AttestationDeviceIdMismatch);
    }

    if let Some(expires_at) = blob.expires_at {
        if Utc::now() >= expires_at {
            return Err(AuthError::AttestationExpired);
        }
    }

    let device_key =
        crypto::decode_public_key(&blob.device_public_key).ok_or(AuthError::MalformedFrame)?;

    if !crypto::verify_with_key(&device_key, nonce_bytes, &response.nonce_signature) {
        return Err(AuthError::SignatureInvalid);
    }

    Ok(Authenticated {
        device_id: device_id.to_string(),
        role: Role::Device,
        device_public_key: Some(device_key),
    })
}
