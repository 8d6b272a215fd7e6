use praxis_core::{KeyId, VaultError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unknown algorithm: '{0}'")]
    UnknownAlgorithm(String),

    /// Tag verification failed, or the nonce/ciphertext is malformed.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("content hash mismatch")]
    ContentHashMismatch,

    #[error("invalid key length: {actual} bytes (expected {expected})")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key {key_id} unavailable: {reason}")]
    KeyUnavailable { key_id: KeyId, reason: String },

    #[error("key derivation failed: {0}")]
    Kdf(String),
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::UnknownAlgorithm(id) => VaultError::UnknownAlgorithm(id),
            CryptoError::AuthenticationFailed => VaultError::AuthenticationFailed,
            CryptoError::ContentHashMismatch => VaultError::ContentHashMismatch,
            CryptoError::KeyUnavailable { key_id, reason } => {
                VaultError::KeyUnavailable { key_id, reason }
            }
            other => VaultError::Other(anyhow::Error::new(other)),
        }
    }
}
