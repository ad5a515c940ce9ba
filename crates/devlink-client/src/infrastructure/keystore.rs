//! Device identity: a persistent Ed25519 keypair, encrypted at rest.
//!
//! # Files
//!
//! ```text
//! <data-dir>/identity.key    bincode { nonce, ciphertext, public_key }
//! <data-dir>/identity.wrap   32-byte AES-256-GCM wrapping key (0600)
//! ```
//!
//! The private seed is sealed under a wrapping key obtained from a
//! [`KeyProtector`].  [`FileKeyProtector`] keeps that key in a sibling file;
//! a hardware-backed protector can be dropped in behind the same trait
//! without touching [`KeyManager`].
//!
//! # Concurrency
//!
//! [`KeyManager::get_or_create_identity`] runs inside one async mutex, so two
//! tasks asking for the identity at the same time on first use still end up
//! with a single keypair on disk.
//!
//! The private key never leaves this module: callers only get signatures and
//! the public key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use devlink_core::ErrorClass;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH, SIGNATURE_LENGTH};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::infrastructure::storage::{remove_if_exists, write_private_file};

/// File holding the sealed identity record.
pub const IDENTITY_FILE: &str = "identity.key";

/// File holding the wrapping key used by [`FileKeyProtector`].
pub const WRAP_KEY_FILE: &str = "identity.wrap";

/// Length of the wrapping key.
pub const WRAP_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;

/// Errors raised by the key store.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("identity record is corrupt: {0}")]
    Corrupt(String),

    #[error("identity record exists but its wrapping key is missing")]
    MissingWrapKey,

    #[error("identity could not be sealed")]
    Seal,

    #[error("identity could not be unsealed")]
    Unseal,
}

impl KeyStoreError {
    /// Classifies this error for the caller's attempt boundary.
    pub fn class(&self) -> ErrorClass {
        match self {
            KeyStoreError::Io { .. } => ErrorClass::TransientIo,
            _ => ErrorClass::AuthenticationRejected,
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> KeyStoreError + '_ {
    move |source| KeyStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ── Key protector seam ────────────────────────────────────────────────────────

/// Supplies the key that seals the identity at rest.
pub trait KeyProtector: Send + Sync {
    /// Returns the wrapping key, creating one if none exists.
    fn load_or_create(&self) -> Result<Zeroizing<[u8; WRAP_KEY_LEN]>, KeyStoreError>;

    /// Returns the wrapping key if one exists.
    fn load(&self) -> Result<Option<Zeroizing<[u8; WRAP_KEY_LEN]>>, KeyStoreError>;

    /// Destroys the wrapping key.
    fn destroy(&self) -> Result<(), KeyStoreError>;
}

/// Keeps the wrapping key in an owner-only file.
#[derive(Debug, Clone)]
pub struct FileKeyProtector {
    path: PathBuf,
}

impl FileKeyProtector {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(WRAP_KEY_FILE),
        }
    }
}

impl KeyProtector for FileKeyProtector {
    fn load_or_create(&self) -> Result<Zeroizing<[u8; WRAP_KEY_LEN]>, KeyStoreError> {
        if let Some(key) = self.load()? {
            return Ok(key);
        }
        let mut key = Zeroizing::new([0u8; WRAP_KEY_LEN]);
        OsRng.fill_bytes(key.as_mut_slice());
        write_private_file(&self.path, key.as_slice()).map_err(io_error(&self.path))?;
        debug!(path = %self.path.display(), "created identity wrapping key");
        Ok(key)
    }

    fn load(&self) -> Result<Option<Zeroizing<[u8; WRAP_KEY_LEN]>>, KeyStoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => Zeroizing::new(b),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&self.path)(e)),
        };
        if bytes.len() != WRAP_KEY_LEN {
            return Err(KeyStoreError::Corrupt(format!(
                "wrapping key is {} bytes",
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; WRAP_KEY_LEN]);
        key.copy_from_slice(&bytes);
        Ok(Some(key))
    }

    fn destroy(&self) -> Result<(), KeyStoreError> {
        remove_if_exists(&self.path).map_err(io_error(&self.path))
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// The on-disk identity record.
#[derive(Debug, Serialize, Deserialize)]
struct SealedIdentity {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
    public_key: [u8; PUBLIC_KEY_LENGTH],
}

/// A loaded signing identity.  The signing key is wiped on drop.
pub struct DeviceIdentity {
    signing_key: SigningKey,
}

impl DeviceIdentity {
    /// The 32-byte Ed25519 public key.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Signs a challenge.
    pub fn sign(&self, challenge: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.signing_key.sign(challenge).to_bytes()
    }

    /// The verifying half, for peers that check signatures.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Owns the device identity for one data directory.
pub struct KeyManager {
    identity_path: PathBuf,
    protector: Arc<dyn KeyProtector>,
    cached: Mutex<Option<Arc<DeviceIdentity>>>,
}

impl KeyManager {
    pub fn new(data_dir: &Path, protector: Arc<dyn KeyProtector>) -> Self {
        Self {
            identity_path: data_dir.join(IDENTITY_FILE),
            protector,
            cached: Mutex::new(None),
        }
    }

    /// A key manager using [`FileKeyProtector`] in the same directory.
    pub fn with_file_protector(data_dir: &Path) -> Self {
        Self::new(data_dir, Arc::new(FileKeyProtector::new(data_dir)))
    }

    /// Returns the identity, loading it from disk or creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError`] if the record cannot be read, unsealed, or
    /// written.
    pub async fn get_or_create_identity(&self) -> Result<Arc<DeviceIdentity>, KeyStoreError> {
        let mut cached = self.cached.lock().await;
        if let Some(identity) = cached.as_ref() {
            return Ok(Arc::clone(identity));
        }

        let identity = match std::fs::read(&self.identity_path) {
            Ok(bytes) => self.unseal(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.create()?,
            Err(e) => return Err(io_error(&self.identity_path)(e)),
        };
        let identity = Arc::new(identity);
        *cached = Some(Arc::clone(&identity));
        Ok(identity)
    }

    /// Signs `challenge` with the device identity.
    ///
    /// # Errors
    ///
    /// Propagates [`KeyManager::get_or_create_identity`] failures.
    pub async fn sign(&self, challenge: &[u8]) -> Result<[u8; SIGNATURE_LENGTH], KeyStoreError> {
        Ok(self.get_or_create_identity().await?.sign(challenge))
    }

    /// Returns the public key, creating the identity if needed.
    pub async fn public_key(&self) -> Result<[u8; PUBLIC_KEY_LENGTH], KeyStoreError> {
        Ok(self.get_or_create_identity().await?.public_key())
    }

    /// Deletes the identity and its wrapping key.
    ///
    /// The next [`KeyManager::get_or_create_identity`] creates a fresh
    /// identity, which the device treats as unknown.
    pub async fn forget(&self) -> Result<(), KeyStoreError> {
        let mut cached = self.cached.lock().await;
        remove_if_exists(&self.identity_path).map_err(io_error(&self.identity_path))?;
        self.protector.destroy()?;
        *cached = None;
        info!("device identity forgotten");
        Ok(())
    }

    fn create(&self) -> Result<DeviceIdentity, KeyStoreError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let wrap_key = self.protector.load_or_create()?;
        let cipher = Aes256Gcm::new_from_slice(wrap_key.as_slice()).map_err(|_| KeyStoreError::Seal)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let seed = Zeroizing::new(signing_key.to_bytes());
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), seed.as_slice())
            .map_err(|_| KeyStoreError::Seal)?;

        let record = SealedIdentity {
            nonce,
            ciphertext,
            public_key: signing_key.verifying_key().to_bytes(),
        };
        let bytes = bincode::serialize(&record).map_err(|e| KeyStoreError::Corrupt(e.to_string()))?;
        write_private_file(&self.identity_path, &bytes).map_err(io_error(&self.identity_path))?;

        info!(path = %self.identity_path.display(), "created new device identity");
        Ok(DeviceIdentity { signing_key })
    }

    fn unseal(&self, bytes: &[u8]) -> Result<DeviceIdentity, KeyStoreError> {
        let record: SealedIdentity =
            bincode::deserialize(bytes).map_err(|e| KeyStoreError::Corrupt(e.to_string()))?;
        let wrap_key = self.protector.load()?.ok_or(KeyStoreError::MissingWrapKey)?;
        let cipher = Aes256Gcm::new_from_slice(wrap_key.as_slice()).map_err(|_| KeyStoreError::Unseal)?;

        let seed = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&record.nonce), record.ciphertext.as_slice())
                .map_err(|_| KeyStoreError::Unseal)?,
        );
        if seed.len() != SECRET_KEY_LENGTH {
            return Err(KeyStoreError::Corrupt(format!("seed is {} bytes", seed.len())));
        }
        let mut seed_bytes = Zeroizing::new([0u8; SECRET_KEY_LENGTH]);
        seed_bytes.copy_from_slice(&seed);
        let signing_key = SigningKey::from_bytes(&seed_bytes);

        if signing_key.verifying_key().to_bytes() != record.public_key {
            return Err(KeyStoreError::Corrupt("public key does not match sealed seed".into()));
        }
        debug!(path = %self.identity_path.display(), "loaded device identity");
        Ok(DeviceIdentity { signing_key })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier};

    #[tokio::test]
    async fn test_identity_is_created_once_and_reloaded() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let first = KeyManager::with_file_protector(dir.path());

        // Act
        let created = first.public_key().await.unwrap();
        let reloaded = KeyManager::with_file_protector(dir.path()).public_key().await.unwrap();

        // Assert
        assert_eq!(created, reloaded);
        assert!(dir.path().join(IDENTITY_FILE).exists());
        assert!(dir.path().join(WRAP_KEY_FILE).exists());
    }

    #[tokio::test]
    async fn test_signature_verifies_under_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::with_file_protector(dir.path());
        let challenge = b"20-byte-challenge!!!";

        let sig = manager.sign(challenge).await.unwrap();
        let identity = manager.get_or_create_identity().await.unwrap();

        assert!(identity
            .verifying_key()
            .verify(challenge, &Signature::from_bytes(&sig))
            .is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_first_use_yields_one_identity() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(KeyManager::with_file_protector(dir.path()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&manager);
                tokio::spawn(async move { m.public_key().await.unwrap() })
            })
            .collect();

        let mut keys = Vec::new();
        for h in handles {
            keys.push(h.await.unwrap());
        }
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
        let on_disk = KeyManager::with_file_protector(dir.path()).public_key().await.unwrap();
        assert_eq!(on_disk, keys[0]);
    }

    #[tokio::test]
    async fn test_forget_produces_a_new_identity() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::with_file_protector(dir.path());
        let before = manager.public_key().await.unwrap();

        // Act
        manager.forget().await.unwrap();

        // Assert
        assert!(!dir.path().join(IDENTITY_FILE).exists());
        assert!(!dir.path().join(WRAP_KEY_FILE).exists());
        let after = manager.public_key().await.unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_identity_file_does_not_contain_the_seed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = KeyManager::with_file_protector(dir.path());
        let identity = manager.get_or_create_identity().await.unwrap();

        let on_disk = std::fs::read(dir.path().join(IDENTITY_FILE)).unwrap();
        let seed = identity.signing_key.to_bytes();
        assert!(!on_disk.windows(seed.len()).any(|w| w == seed));
    }

    #[tokio::test]
    async fn test_missing_wrap_key_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        KeyManager::with_file_protector(dir.path()).public_key().await.unwrap();
        std::fs::remove_file(dir.path().join(WRAP_KEY_FILE)).unwrap();

        let err = KeyManager::with_file_protector(dir.path())
            .get_or_create_identity()
            .await
            .unwrap_err();
        assert!(matches!(err, KeyStoreError::MissingWrapKey));
    }

    #[tokio::test]
    async fn test_wrong_wrap_key_fails_to_unseal() {
        let dir = tempfile::tempdir().unwrap();
        KeyManager::with_file_protector(dir.path()).public_key().await.unwrap();
        std::fs::write(dir.path().join(WRAP_KEY_FILE), [0x55u8; WRAP_KEY_LEN]).unwrap();

        let err = KeyManager::with_file_protector(dir.path())
            .get_or_create_identity()
            .await
            .unwrap_err();
        assert!(matches!(err, KeyStoreError::Unseal));
    }

    #[tokio::test]
    async fn test_truncated_record_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        KeyManager::with_file_protector(dir.path()).public_key().await.unwrap();
        std::fs::write(dir.path().join(IDENTITY_FILE), [1u8, 2, 3]).unwrap();

        let err = KeyManager::with_file_protector(dir.path())
            .get_or_create_identity()
            .await
            .unwrap_err();
        assert!(matches!(err, KeyStoreError::Corrupt(_)));
    }
}
