use praxis_core::{KeyId, KeyStatus, TenantId, Timestamp};
use praxis_crypto::Algorithm;
use serde::{Deserialize, Serialize};

/// One version of a named tenant key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key_id: KeyId,
    pub tenant_id: TenantId,
    /// Logical key name, e.g. "clinical-notes"
    pub name: String,
    pub algorithm: Algorithm,
    /// 1 for the first version, +1 per rotation
    pub key_version: u32,
    /// Stored status: Active or Retired. See `effective_status` for expiry.
    pub status: KeyStatus,
    pub created_at: Timestamp,
    #[serde(default)]
    pub activated_at: Option<Timestamp>,
    #[serde(default)]
    pub retired_at: Option<Timestamp>,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
    /// Free-text operator comment
    #[serde(default)]
    pub notes: Option<String>,
}

impl KeyRecord {
    /// True once `now` reaches `expires_at`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Status as seen at `now`: an Active entry past its expiry reports Expired.
    pub fn effective_status(&self, now: Timestamp) -> KeyStatus {
        match self.status {
            KeyStatus::Active if self.is_expired(now) => KeyStatus::Expired,
            status => status,
        }
    }

    pub fn key_ref(&self) -> KeyRef {
        KeyRef {
            key_id: self.key_id,
            key_version: self.key_version,
            algorithm: self.algorithm,
        }
    }
}

/// What a note needs to know about the key it is sealed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub key_id: KeyId,
    pub key_version: u32,
    pub algorithm: Algorithm,
}
