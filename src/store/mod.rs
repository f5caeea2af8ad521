//! Persistent state store: the gateway's own identity keypair and the
//! desktop's bound public key, once claimed.
//!
//! `gateway.key` and `desktop.pub` are plain standard-base64 text files.
//! Writes are atomic with respect to crashes: content is written to a
//! temp sibling, fsynced, then renamed over the target.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{SigningKey, VerifyingKey};
use parking_lot::RwLock;
use thiserror::Error;

const KEY_FILE: &str = "gateway.key";
const DESKTOP_PUB_FILE: &str = "desktop.pub";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt identity material in {path}")]
    Corrupt { path: PathBuf },
}

#[derive(Error, Debug)]
#[error("gateway is already claimed")]
pub struct ClaimError;

/// The gateway's own signing identity plus the (optional) desktop binding.
pub struct StateStore {
    dir: PathBuf,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    desktop_public_key: RwLock<Option<VerifyingKey>>,
}

impl StateStore {
    /// Load identity material from `dir`, generating and persisting a fresh
    /// keypair if the directory is empty. Idempotent across restarts.
    pub fn load_or_init(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Write {
            path: dir.clone(),
            source,
        })?;

        let key_path = dir.join(KEY_FILE);
        let signing_key = if key_path.exists() {
            load_signing_key(&key_path)?
        } else {
            let kp = crate::crypto::generate_identity();
            write_atomic(&key_path, STANDARD.encode(kp.signing_key.to_bytes()).as_bytes())
                .map_err(|source| StoreError::Write {
                    path: key_path.clone(),
                    source,
                })?;
            set_private_permissions(&key_path);
            kp.signing_key
        };
        let verifying_key = signing_key.verifying_key();

        let desktop_pub_path = dir.join(DESKTOP_PUB_FILE);
        let desktop_public_key = if desktop_pub_path.exists() {
            Some(load_verifying_key(&desktop_pub_path)?)
        } else {
            None
        };

        Ok(Self {
            dir,
            signing_key,
            verifying_key,
            desktop_public_key: RwLock::new(desktop_public_key),
        })
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    pub fn gateway_public_key_base64(&self) -> String {
        STANDARD.encode(self.verifying_key.to_bytes())
    }

    pub fn is_claimed(&self) -> bool {
        self.desktop_public_key.read().is_some()
    }

    pub fn get_desktop_public_key(&self) -> Option<VerifyingKey> {
        *self.desktop_public_key.read()
    }

    /// Bind `pubkey` as the desktop's identity. Fails if already claimed.
    /// The disk write and the in-memory snapshot update happen under the
    /// same write-lock hold, so concurrent readers never see a torn state.
    pub fn bind_desktop(&self, pubkey: VerifyingKey) -> Result<(), ClaimError> {
        let mut guard = self.desktop_public_key.write();
        if guard.is_some() {
            return Err(ClaimError);
        }

        let path = self.dir.join(DESKTOP_PUB_FILE);
        let encoded = STANDARD.encode(pubkey.to_bytes());
        if write_atomic(&path, encoded.as_bytes()).is_err() {
            return Err(ClaimError);
        }

        *guard = Some(pubkey);
        Ok(())
    }
}

fn load_signing_key(path: &Path) -> Result<SigningKey, StoreError> {
    let content = fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let bytes = STANDARD
        .decode(content.trim())
        .map_err(|_| StoreError::Corrupt {
            path: path.to_path_buf(),
        })?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| StoreError::Corrupt {
        path: path.to_path_buf(),
    })?;
    Ok(SigningKey::from_bytes(&bytes))
}

fn load_verifying_key(path: &Path) -> Result<VerifyingKey, StoreError> {
    let content = fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    crate::crypto::decode_public_key(content.trim()).ok_or_else(|| StoreError::Corrupt {
        path: path.to_path_buf(),
    })
}

/// Write `bytes` to `path` via temp-sibling + fsync + rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_private_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        let mut perms = meta.permissions();
        perms.set_mode(0o600);
        let _ = fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_private_permissions(_path: &Path) {}
