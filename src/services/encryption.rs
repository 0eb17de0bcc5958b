use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;

use super::storage::{BlobStore, StorageError};

const NONCE_LEN: usize = 12;

/// Blob store decorator that keeps photos encrypted at rest with
/// AES-256-GCM. Stored objects are `nonce || ciphertext`.
pub struct EncryptedBlobStore {
    inner: Arc<dyn BlobStore>,
    cipher: Aes256Gcm,
}

impl EncryptedBlobStore {
    /// Wrap `inner` using a base64-encoded 32-byte key.
    pub fn new(inner: Arc<dyn BlobStore>, key_base64: &str) -> Result<Self, EncryptionError> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_base64)
            .map_err(|_| EncryptionError::InvalidKey)?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKey);
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKey)?;

        Ok(Self { inner, cipher })
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| EncryptionError::EncryptFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if sealed.len() < NONCE_LEN {
            return Err(EncryptionError::DecryptFailed);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| EncryptionError::DecryptFailed)
    }
}

#[async_trait]
impl BlobStore for EncryptedBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let sealed = self
            .seal(data)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        self.inner.put(key, &sealed).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let sealed = self.inner.get(key).await?;
        self.open(&sealed)
            .map_err(|e| StorageError::Corrupt(format!("{}: {}", key, e)))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed")]
    DecryptFailed,
}
