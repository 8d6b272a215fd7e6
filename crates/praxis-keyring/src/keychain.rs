//! Platform keychain custody for per-key material.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Linux: GNOME Keyring / Secret Service (D-Bus)
//! - Windows: Credential Manager (DPAPI)
//!
//! Each key version is one entry, named by its key id, holding the material
//! as base64. Keychain calls block, so they run on the blocking pool.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use praxis_core::KeyId;
use praxis_crypto::{generate_key_material, Algorithm, CryptoError, KeyCustodian, KeyMaterial};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

const DEFAULT_SERVICE: &str = "praxis";

#[derive(Debug, Clone)]
pub struct KeychainCustodian {
    service: String,
}

impl Default for KeychainCustodian {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE)
    }
}

impl KeychainCustodian {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Check if the platform keychain is available.
    pub fn is_available(&self) -> bool {
        keyring::Entry::new(&self.service, "__praxis_probe__").is_ok()
    }

    /// Remove a key's material. Notes sealed under it become unreadable.
    pub async fn delete(&self, key_id: KeyId) -> Result<(), CryptoError> {
        let service = self.service.clone();
        run_blocking(key_id, move || {
            let entry = entry(&service, key_id)?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(unavailable(key_id, format!("keychain delete: {e}"))),
            }
        })
        .await
    }
}

fn unavailable(key_id: KeyId, reason: String) -> CryptoError {
    CryptoError::KeyUnavailable { key_id, reason }
}

fn entry(service: &str, key_id: KeyId) -> Result<keyring::Entry, CryptoError> {
    keyring::Entry::new(service, &key_id.to_string())
        .map_err(|e| unavailable(key_id, format!("keychain entry creation: {e}")))
}

async fn run_blocking<T, F>(key_id: KeyId, f: F) -> Result<T, CryptoError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CryptoError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| unavailable(key_id, format!("keychain task failed: {e}")))?
}

pub(crate) fn encode_material(material: &KeyMaterial) -> SecretString {
    SecretString::from(STANDARD.encode(material.as_bytes()))
}

pub(crate) fn decode_material(key_id: KeyId, encoded: &SecretString) -> Result<KeyMaterial, CryptoError> {
    let mut bytes = STANDARD
        .decode(encoded.expose_secret())
        .map_err(|e| unavailable(key_id, format!("keychain entry is not base64: {e}")))?;
    let material = KeyMaterial::from_slice(&bytes);
    bytes.zeroize();
    material
}

impl KeyCustodian for KeychainCustodian {
    async fn fetch_key_material(&self, key_id: KeyId) -> Result<KeyMaterial, CryptoError> {
        let service = self.service.clone();
        run_blocking(key_id, move || {
            let entry = entry(&service, key_id)?;
            match entry.get_password() {
                Ok(mut password) => {
                    let secret = SecretString::from(password.clone());
                    password.zeroize();
                    decode_material(key_id, &secret)
                }
                Err(keyring::Error::NoEntry) => {
                    Err(unavailable(key_id, "no keychain entry".into()))
                }
                Err(e) => Err(unavailable(key_id, format!("keychain get: {e}"))),
            }
        })
        .await
    }

    async fn provision(&self, key_id: KeyId, algorithm: Algorithm) -> Result<(), CryptoError> {
        let service = self.service.clone();
        run_blocking(key_id, move || {
            let entry = entry(&service, key_id)?;
            let encoded = encode_material(&generate_key_material());
            entry
                .set_password(encoded.expose_secret())
                .map_err(|e| unavailable(key_id, format!("keychain store: {e}")))?;
            tracing::debug!(%key_id, %algorithm, "stored key material in platform keychain");
            Ok(())
        })
        .await
    }

    async fn discard(&self, key_id: KeyId) -> Result<(), CryptoError> {
        self.delete(key_id).await
    }
}
