//! Per-version key material: random generation and HKDF derivation from the master key

use hkdf::Hkdf;
use praxis_core::KeyId;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::kdf::MasterKey;
use crate::KEY_SIZE;

/// HKDF info prefix; the key id bytes follow it.
const KEY_INFO_PREFIX: &[u8] = b"praxis-key/v1";

/// Symmetric key material for one key ring version. Zeroized on drop.
#[derive(Clone)]
pub struct KeyMaterial {
    bytes: [u8; KEY_SIZE],
}

impl KeyMaterial {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self::from_bytes(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate random key material.
pub fn generate_key_material() -> KeyMaterial {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    KeyMaterial::from_bytes(bytes)
}

/// Derive the material for `key_id` from the master key via HKDF-SHA256.
///
/// Deterministic: the same master key always yields the same material for a
/// given key id, so nothing but the master key has to be kept.
pub fn derive_key_material(master: &MasterKey, key_id: KeyId) -> Result<KeyMaterial, CryptoError> {
    let mut info = Vec::with_capacity(KEY_INFO_PREFIX.len() + 16);
    info.extend_from_slice(KEY_INFO_PREFIX);
    info.extend_from_slice(key_id.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(None, master.as_bytes());
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(&info, &mut okm)
        .map_err(|e| CryptoError::Kdf(format!("HKDF expand failed: {e}")))?;

    let material = KeyMaterial::from_bytes(okm);
    okm.zeroize();
    Ok(material)
}
