//! Ed25519 signing, verification, and nonce generation.
//!
//! Keys and signatures are exchanged as standard-alphabet base64 (no URL
//! variant); nonces as lowercase hex. Verification never panics on
//! malformed input — callers get `false`, not an error.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

pub struct Keypair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

/// Generate a fresh Ed25519 keypair.
pub fn generate_identity() -> Keypair {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    Keypair {
        signing_key,
        verifying_key,
    }
}

/// Sign `bytes` with `signing_key`, returning the standard-base64 signature.
pub fn sign(signing_key: &SigningKey, bytes: &[u8]) -> String {
    let sig = signing_key.sign(bytes);
    STANDARD.encode(sig.to_bytes())
}

/// Verify `signature_b64` (standard base64) over `bytes` under `pubkey_b64`
/// (standard base64). Returns `false` for any malformed input rather than
/// erroring — signature verification is constant-time via `ed25519-dalek`.
pub fn verify(pubkey_b64: &str, bytes: &[u8], signature_b64: &str) -> bool {
    let Ok(pubkey_bytes) = STANDARD.decode(pubkey_b64) else {
        return false;
    };
    let Ok(pubkey_bytes): Result<[u8; 32], _> = pubkey_bytes.try_into() else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pubkey_bytes) else {
        return false;
    };

    let Ok(sig_bytes) = STANDARD.decode(signature_b64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };

    verifying_key.verify_strict(bytes, &signature).is_ok()
}

/// Verify `signature_b64` directly against a parsed [`VerifyingKey`].
pub fn verify_with_key(verifying_key: &VerifyingKey, bytes: &[u8], signature_b64: &str) -> bool {
    let Ok(sig_bytes) = STANDARD.decode(signature_b64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    verifying_key.verify_strict(bytes, &signature).is_ok()
}

/// Decode a standard-base64 Ed25519 public key.
pub fn decode_public_key(pubkey_b64: &str) -> Option<VerifyingKey> {
    let bytes = STANDARD.decode(pubkey_b64).ok()?;
    let bytes: [u8; 32] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// Generate a fresh 32-byte nonce, returned as lowercase hex.
pub fn random_nonce() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
