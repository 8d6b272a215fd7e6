//! praxis-crypto: envelope encryption for clinical notes
//!
//! Seal pipeline: plaintext → BLAKE3 content hash → AEAD seal (random nonce, caller AAD)
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, raw key file or Argon2id from passphrase)
//!   └── Key material per key ring version (HKDF-SHA256, info = "praxis-key/v1" || key_id)
//!       └── Note AEAD: AES-256-GCM or XChaCha20-Poly1305 (nonce fresh per seal)
//! ```
//!
//! Key material never leaves a [`KeyCustodian`] except as a zeroize-on-drop
//! [`KeyMaterial`] for the duration of one seal or open.

pub mod algorithm;
pub mod b64;
pub mod custodian;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keys;

pub use algorithm::Algorithm;
pub use custodian::{fetch_with_timeout, DerivedCustodian, KeyCustodian, MemoryCustodian};
pub use envelope::{content_hash, open, seal, Envelope};
pub use error::CryptoError;
pub use kdf::{derive_master_key, generate_master_key, generate_salt, KdfParams, MasterKey};
pub use keys::{derive_key_material, generate_key_material, KeyMaterial};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a BLAKE3 content hash
pub const HASH_SIZE: usize = 32;

/// Size of an AEAD authentication tag (GCM and Poly1305 alike)
pub const TAG_SIZE: usize = 16;

/// Size of an Argon2id salt
pub const SALT_SIZE: usize = 16;
