//! Key custody: where key material lives between seals.
//!
//! The vault only ever holds a `KeyId`; material is fetched from a custodian
//! for the duration of one seal or open and zeroized when dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use praxis_core::KeyId;
use tokio::sync::RwLock;

use crate::algorithm::Algorithm;
use crate::error::CryptoError;
use crate::kdf::MasterKey;
use crate::keys::{derive_key_material, generate_key_material, KeyMaterial};

pub trait KeyCustodian: Send + Sync {
    /// Material for an existing key version. Unknown ids are `KeyUnavailable`.
    fn fetch_key_material(
        &self,
        key_id: KeyId,
    ) -> impl Future<Output = Result<KeyMaterial, CryptoError>> + Send;

    /// Called once when a key version is created, before it becomes Active.
    fn provision(
        &self,
        key_id: KeyId,
        algorithm: Algorithm,
    ) -> impl Future<Output = Result<(), CryptoError>> + Send;

    /// Forget material provisioned for a key version that was never committed.
    /// Custodians that store nothing per key have nothing to do.
    fn discard(&self, key_id: KeyId) -> impl Future<Output = Result<(), CryptoError>> + Send {
        let _ = key_id;
        std::future::ready(Ok(()))
    }
}

impl<C: KeyCustodian> KeyCustodian for Arc<C> {
    fn fetch_key_material(
        &self,
        key_id: KeyId,
    ) -> impl Future<Output = Result<KeyMaterial, CryptoError>> + Send {
        (**self).fetch_key_material(key_id)
    }

    fn provision(
        &self,
        key_id: KeyId,
        algorithm: Algorithm,
    ) -> impl Future<Output = Result<(), CryptoError>> + Send {
        (**self).provision(key_id, algorithm)
    }

    fn discard(&self, key_id: KeyId) -> impl Future<Output = Result<(), CryptoError>> + Send {
        (**self).discard(key_id)
    }
}

/// Fetch with an upper bound; a custodian that does not answer in time is `KeyUnavailable`.
pub async fn fetch_with_timeout<C: KeyCustodian>(
    custodian: &C,
    key_id: KeyId,
    timeout: Duration,
) -> Result<KeyMaterial, CryptoError> {
    match tokio::time::timeout(timeout, custodian.fetch_key_material(key_id)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(%key_id, timeout_ms = timeout.as_millis() as u64, "key custodian timed out");
            Err(CryptoError::KeyUnavailable {
                key_id,
                reason: format!("custodian did not respond within {}ms", timeout.as_millis()),
            })
        }
    }
}

/// Random per-key material held in process memory. Lost on exit.
#[derive(Debug, Default, Clone)]
pub struct MemoryCustodian {
    keys: Arc<RwLock<HashMap<KeyId, KeyMaterial>>>,
}

impl MemoryCustodian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget a key's material. Notes sealed under it become unreadable.
    pub async fn revoke(&self, key_id: KeyId) -> bool {
        self.keys.write().await.remove(&key_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }
}

impl KeyCustodian for MemoryCustodian {
    async fn fetch_key_material(&self, key_id: KeyId) -> Result<KeyMaterial, CryptoError> {
        self.keys
            .read()
            .await
            .get(&key_id)
            .cloned()
            .ok_or_else(|| CryptoError::KeyUnavailable {
                key_id,
                reason: "no material held for this key".into(),
            })
    }

    async fn provision(&self, key_id: KeyId, _algorithm: Algorithm) -> Result<(), CryptoError> {
        self.keys
            .write()
            .await
            .entry(key_id)
            .or_insert_with(generate_key_material);
        Ok(())
    }

    async fn discard(&self, key_id: KeyId) -> Result<(), CryptoError> {
        self.revoke(key_id).await;
        Ok(())
    }
}

/// Material derived on demand from one master key with HKDF-SHA256.
///
/// Nothing per-key is stored, so `provision` has no work to do.
#[derive(Debug, Clone)]
pub struct DerivedCustodian {
    master: Arc<MasterKey>,
}

impl DerivedCustodian {
    pub fn new(master: MasterKey) -> Self {
        Self {
            master: Arc::new(master),
        }
    }
}

impl KeyCustodian for DerivedCustodian {
    async fn fetch_key_material(&self, key_id: KeyId) -> Result<KeyMaterial, CryptoError> {
        derive_key_material(&self.master, key_id)
    }

    async fn provision(&self, key_id: KeyId, algorithm: Algorithm) -> Result<(), CryptoError> {
        tracing::debug!(%key_id, %algorithm, "derived custodian: nothing to provision");
        Ok(())
    }
}
