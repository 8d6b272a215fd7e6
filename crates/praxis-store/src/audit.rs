//! Append-only audit trail.
//!
//! Entries are produced inside the mutation's transaction: the sink sees the
//! entry first and the entry is appended to the working state second. A sink
//! error fails the whole call before anything is committed.
//!
//! `changes_json` carries status/version/key bookkeeping only. Plaintext,
//! ciphertext and key material never appear in it.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use praxis_core::{AuditAction, Principal, TenantId, Timestamp, UserId, VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    ClinicalNote,
    KeyRing,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClinicalNote => "ClinicalNote",
            Self::KeyRing => "KeyRing",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: Uuid,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub action: AuditAction,
    #[serde(default)]
    pub changes_json: Option<String>,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl AuditEntry {
    pub fn new(
        tenant_id: TenantId,
        entity_type: EntityType,
        entity_id: Uuid,
        action: AuditAction,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            tenant_id,
            user_id: None,
            entity_type,
            entity_id,
            action,
            changes_json: None,
            timestamp,
            ip_address: None,
        }
    }

    /// Attribute the entry to the acting principal.
    pub fn by(mut self, principal: &Principal) -> Self {
        self.user_id = Some(principal.user_id);
        self.ip_address = principal.ip_address.clone();
        self
    }

    pub fn with_changes(mut self, changes: serde_json::Value) -> Self {
        self.changes_json = Some(changes.to_string());
        self
    }
}

/// Receives every audit entry before the transaction commits.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry) -> VaultResult<()>;
}

/// Emits each entry as a structured `tracing` event on target `praxis::audit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: &AuditEntry) -> VaultResult<()> {
        tracing::info!(
            target: "praxis::audit",
            audit_id = %entry.audit_id,
            tenant_id = %entry.tenant_id,
            user_id = ?entry.user_id,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            action = %entry.action,
            changes = entry.changes_json.as_deref().unwrap_or(""),
            timestamp = entry.timestamp,
            "audit"
        );
        Ok(())
    }
}

/// Collects entries in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: &AuditEntry) -> VaultResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }
}

/// Forwards entries to the sink, then appends them to the transaction's log.
#[derive(Clone)]
pub struct AuditEmitter {
    sink: Arc<dyn AuditSink>,
}

impl fmt::Debug for AuditEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditEmitter").finish_non_exhaustive()
    }
}

impl Default for AuditEmitter {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

impl AuditEmitter {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn record(&self, log: &mut Vec<AuditEntry>, entry: AuditEntry) -> VaultResult<()> {
        self.sink.record(&entry).map_err(|e| match e {
            VaultError::Audit(_) => e,
            other => VaultError::Audit(other.to_string()),
        })?;
        log.push(entry);
        Ok(())
    }
}
