//! Envelope codec: AEAD seal/open with a BLAKE3 content hash of the plaintext
//!
//! Envelope format:
//! ```text
//! algorithm    identifier string ("AES-256-GCM" | "XCHACHA20-POLY1305")
//! nonce        random, algorithm.nonce_len() bytes, fresh per seal
//! ciphertext   encrypted plaintext || 16-byte tag
//! aad          caller-supplied associated data (empty if unused), bound into the tag
//! content_hash BLAKE3(plaintext), checked after decryption
//! ```

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::algorithm::Algorithm;
use crate::error::CryptoError;
use crate::keys::KeyMaterial;
use crate::{b64, HASH_SIZE};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    pub algorithm: Algorithm,
    #[serde(with = "b64", default)]
    pub aad: Vec<u8>,
    #[serde(with = "b64::option", default)]
    pub content_hash: Option<Vec<u8>>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("algorithm", &self.algorithm)
            .field("ciphertext_len", &self.ciphertext.len())
            .field("nonce_len", &self.nonce.len())
            .field("aad_len", &self.aad.len())
            .field("has_content_hash", &self.content_hash.is_some())
            .finish()
    }
}

/// BLAKE3 hash of the plaintext as stored in `Envelope::content_hash`.
pub fn content_hash(plaintext: &[u8]) -> [u8; HASH_SIZE] {
    *blake3::hash(plaintext).as_bytes()
}

/// Seal `plaintext` under `key` with a fresh random nonce.
pub fn seal(
    plaintext: &[u8],
    key: &KeyMaterial,
    algorithm: Algorithm,
    aad: Option<&[u8]>,
) -> Result<Envelope, CryptoError> {
    let hash = content_hash(plaintext);
    let aad = aad.unwrap_or_default();

    let mut nonce = vec![0u8; algorithm.nonce_len()];
    rand::thread_rng().fill_bytes(&mut nonce);

    let payload = Payload {
        msg: plaintext,
        aad,
    };
    let ciphertext = match algorithm {
        Algorithm::Aes256Gcm => Aes256Gcm::new(key.as_bytes().into())
            .encrypt(aes_gcm::Nonce::from_slice(&nonce), payload),
        Algorithm::XChaCha20Poly1305 => XChaCha20Poly1305::new(key.as_bytes().into())
            .encrypt(XNonce::from_slice(&nonce), payload),
    }
    .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(Envelope {
        ciphertext,
        nonce,
        algorithm,
        aad: aad.to_vec(),
        content_hash: Some(hash.to_vec()),
    })
}

/// Open an envelope and verify its content hash.
///
/// A nonce of the wrong length, a truncated ciphertext, or a failed tag check
/// all surface as `AuthenticationFailed`.
pub fn open(envelope: &Envelope, key: &KeyMaterial) -> Result<Vec<u8>, CryptoError> {
    let algorithm = envelope.algorithm;
    if envelope.nonce.len() != algorithm.nonce_len()
        || envelope.ciphertext.len() < algorithm.tag_len()
    {
        return Err(CryptoError::AuthenticationFailed);
    }

    let payload = Payload {
        msg: envelope.ciphertext.as_slice(),
        aad: envelope.aad.as_slice(),
    };
    let plaintext = match algorithm {
        Algorithm::Aes256Gcm => Aes256Gcm::new(key.as_bytes().into())
            .decrypt(aes_gcm::Nonce::from_slice(&envelope.nonce), payload),
        Algorithm::XChaCha20Poly1305 => XChaCha20Poly1305::new(key.as_bytes().into())
            .decrypt(XNonce::from_slice(&envelope.nonce), payload),
    }
    .map_err(|_| CryptoError::AuthenticationFailed)?;

    if let Some(expected) = &envelope.content_hash {
        let expected: [u8; HASH_SIZE] = expected
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::ContentHashMismatch)?;
        // blake3::Hash equality is constant-time
        if blake3::hash(&plaintext) != blake3::Hash::from(expected) {
            return Err(CryptoError::ContentHashMismatch);
        }
    }

    Ok(plaintext)
}
