//! AEAD algorithm identifiers as persisted alongside every envelope

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CryptoError;
use crate::TAG_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Algorithm {
    /// AES-256-GCM, 96-bit nonce
    #[default]
    Aes256Gcm,
    /// XChaCha20-Poly1305, 192-bit nonce
    XChaCha20Poly1305,
}

impl Algorithm {
    pub const ALL: [Algorithm; 2] = [Self::Aes256Gcm, Self::XChaCha20Poly1305];

    /// Identifier string stored with the envelope
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "AES-256-GCM",
            Self::XChaCha20Poly1305 => "XCHACHA20-POLY1305",
        }
    }

    pub fn nonce_len(&self) -> usize {
        match self {
            Self::Aes256Gcm => 12,
            Self::XChaCha20Poly1305 => 24,
        }
    }

    pub fn tag_len(&self) -> usize {
        TAG_SIZE
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

impl FromStr for Algorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.identifier().eq_ignore_ascii_case(s))
            .ok_or_else(|| CryptoError::UnknownAlgorithm(s.to_string()))
    }
}

impl TryFrom<String> for Algorithm {
    type Error = CryptoError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Algorithm> for String {
    fn from(a: Algorithm) -> Self {
        a.identifier().to_string()
    }
}
