//! Key ring registry: per-tenant key versions, resolution, and rotation
//!
//! Rotation flow:
//!   1. Find the single Active entry for (tenant, name)
//!   2. Compare its version against the one the caller observed
//!   3. Mark it Retired (retired_at = now)
//!   4. Append version + 1 as Active
//!
//! Notes sealed under the retired version keep referencing it; nothing is
//! re-encrypted.

use praxis_core::{KeyId, KeyStatus, TenantId, Timestamp, VaultError, VaultResult};
use praxis_crypto::Algorithm;
use serde::{Deserialize, Serialize};

use crate::record::{KeyRecord, KeyRef};

/// Outcome of a rotation
#[derive(Debug, Clone)]
pub struct Rotation {
    /// The version that was Active before the call, now Retired
    pub retired: KeyRecord,
    /// The new Active version
    pub activated: KeyRecord,
    pub rotated_at: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRegistry {
    pub keys: Vec<KeyRecord>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn active_index(&self, tenant_id: TenantId, name: &str) -> Option<usize> {
        self.keys.iter().position(|k| {
            k.tenant_id == tenant_id && k.name == name && k.status == KeyStatus::Active
        })
    }

    /// The stored Active entry for (tenant, name), expired or not.
    pub fn active(&self, tenant_id: TenantId, name: &str) -> Option<&KeyRecord> {
        self.active_index(tenant_id, name).map(|i| &self.keys[i])
    }

    /// The key new notes must be sealed under.
    pub fn resolve_active(
        &self,
        tenant_id: TenantId,
        name: &str,
        now: Timestamp,
    ) -> VaultResult<KeyRef> {
        let key = self
            .active(tenant_id, name)
            .ok_or_else(|| VaultError::NoActiveKey {
                tenant_id,
                key_name: name.to_string(),
            })?;

        if key.is_expired(now) {
            return Err(VaultError::KeyExpired {
                key_id: key.key_id,
                // is_expired implies expires_at is set
                expires_at: key.expires_at.unwrap_or(now),
            });
        }

        Ok(key.key_ref())
    }

    /// Any version, whatever its status. Reads of old notes go through here.
    pub fn get(&self, key_id: KeyId) -> Option<&KeyRecord> {
        self.keys.iter().find(|k| k.key_id == key_id)
    }

    /// All versions of (tenant, name), oldest first.
    pub fn history(&self, tenant_id: TenantId, name: &str) -> Vec<&KeyRecord> {
        let mut versions: Vec<&KeyRecord> = self
            .keys
            .iter()
            .filter(|k| k.tenant_id == tenant_id && k.name == name)
            .collect();
        versions.sort_by_key(|k| k.key_version);
        versions
    }

    pub fn for_tenant(&self, tenant_id: TenantId) -> impl Iterator<Item = &KeyRecord> {
        self.keys.iter().filter(move |k| k.tenant_id == tenant_id)
    }

    fn latest_version(&self, tenant_id: TenantId, name: &str) -> u32 {
        self.keys
            .iter()
            .filter(|k| k.tenant_id == tenant_id && k.name == name)
            .map(|k| k.key_version)
            .max()
            .unwrap_or(0)
    }

    /// Create the first Active version of a named key.
    pub fn provision(
        &mut self,
        tenant_id: TenantId,
        name: &str,
        algorithm: Algorithm,
        expires_at: Option<Timestamp>,
        notes: Option<String>,
        now: Timestamp,
    ) -> VaultResult<KeyRecord> {
        if self.active_index(tenant_id, name).is_some() {
            return Err(VaultError::DuplicateActiveKey {
                tenant_id,
                key_name: name.to_string(),
            });
        }

        let record = KeyRecord {
            key_id: KeyId::new(),
            tenant_id,
            name: name.to_string(),
            algorithm,
            key_version: self.latest_version(tenant_id, name) + 1,
            status: KeyStatus::Active,
            created_at: now,
            activated_at: Some(now),
            retired_at: None,
            expires_at,
            notes,
        };
        self.keys.push(record.clone());

        tracing::info!(
            %tenant_id,
            key_name = name,
            key_id = %record.key_id,
            key_version = record.key_version,
            %algorithm,
            "key provisioned"
        );
        Ok(record)
    }

    /// Retire the Active version and activate its successor.
    ///
    /// `expected_version` is the Active version the caller observed; when it
    /// no longer matches, another rotation won and this one fails with
    /// `ConcurrentModification`. An expired Active key may still be rotated.
    pub fn rotate(
        &mut self,
        tenant_id: TenantId,
        name: &str,
        expected_version: Option<u32>,
        expires_at: Option<Timestamp>,
        now: Timestamp,
    ) -> VaultResult<Rotation> {
        let idx = self
            .active_index(tenant_id, name)
            .ok_or_else(|| VaultError::NoActiveKey {
                tenant_id,
                key_name: name.to_string(),
            })?;

        let current = &mut self.keys[idx];
        if let Some(expected) = expected_version {
            if expected != current.key_version {
                return Err(VaultError::ConcurrentModification {
                    expected,
                    actual: current.key_version,
                });
            }
        }

        current.status = KeyStatus::Retired;
        current.retired_at = Some(now);
        let retired = current.clone();

        let activated = KeyRecord {
            key_id: KeyId::new(),
            tenant_id,
            name: name.to_string(),
            algorithm: retired.algorithm,
            key_version: retired.key_version + 1,
            status: KeyStatus::Active,
            created_at: now,
            activated_at: Some(now),
            retired_at: None,
            expires_at,
            notes: None,
        };
        self.keys.push(activated.clone());

        tracing::info!(
            %tenant_id,
            key_name = name,
            retired = %retired.key_id,
            activated = %activated.key_id,
            key_version = activated.key_version,
            "key rotated"
        );
        Ok(Rotation {
            retired,
            activated,
            rotated_at: now,
        })
    }
}
