//! Session references: the slice of the scheduling workflow the vault needs
//! to scope a note to a tenant and a therapist of record.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use praxis_core::{CaseFileId, SessionId, TenantId, UserId, VaultError, VaultResult};
use serde::{Deserialize, Serialize};

use crate::storage::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub case_file_id: CaseFileId,
    /// Therapist of record: the only non-administrative user who may touch the session's notes
    pub therapist_id: UserId,
}

/// Looks sessions up on demand. Notes only carry a `SessionId`.
pub trait SessionDirectory: Send + Sync {
    fn lookup(&self, session_id: SessionId) -> Option<SessionRef>;
}

/// Session directory held in memory, optionally persisted as a JSON list.
#[derive(Debug, Default)]
pub struct MemorySessionDirectory {
    sessions: RwLock<HashMap<SessionId, SessionRef>>,
}

impl MemorySessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: SessionRef) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.session_id, session);
    }

    /// Add a session on behalf of its tenant.
    ///
    /// A session id that belongs to another tenant is never taken over. One
    /// of the same tenant is only replaced when `replace` is set, which is how
    /// a therapist of record is reassigned.
    pub fn register(&self, session: SessionRef, replace: bool) -> VaultResult<()> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = sessions.get(&session.session_id) {
            if existing.tenant_id != session.tenant_id {
                tracing::warn!(
                    target: "praxis::security",
                    session_id = %session.session_id,
                    owner_tenant = %existing.tenant_id,
                    claiming_tenant = %session.tenant_id,
                    "refused to register a session owned by another tenant"
                );
                return Err(VaultError::TenantMismatch);
            }
            if !replace {
                return Err(VaultError::AlreadyExists(format!(
                    "session {}",
                    session.session_id
                )));
            }
        }
        sessions.insert(session.session_id, session);
        Ok(())
    }

    pub fn remove(&self, session_id: SessionId) -> Option<SessionRef> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id)
    }

    /// Sessions of one tenant, ordered by id
    pub fn for_tenant(&self, tenant_id: TenantId) -> Vec<SessionRef> {
        let mut list: Vec<SessionRef> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        list.sort_by_key(|s| s.session_id);
        list
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load from a JSON file. A missing file is an empty directory.
    pub fn load(path: &Path) -> VaultResult<Self> {
        let directory = Self::new();
        if !path.exists() {
            return Ok(directory);
        }
        let content = std::fs::read_to_string(path)?;
        let sessions: Vec<SessionRef> = serde_json::from_str(&content).map_err(|e| {
            VaultError::Storage(format!("parsing session directory {}: {e}", path.display()))
        })?;
        for session in sessions {
            directory.insert(session);
        }
        Ok(directory)
    }

    /// Save to a JSON file
    pub fn save(&self, path: &Path) -> VaultResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut sessions: Vec<SessionRef> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.session_id);

        let json = serde_json::to_vec_pretty(&sessions)
            .map_err(|e| VaultError::Storage(format!("serializing session directory: {e}")))?;
        write_atomic(path, &json)
    }
}

impl SessionDirectory for MemorySessionDirectory {
    fn lookup(&self, session_id: SessionId) -> Option<SessionRef> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(tenant_id: TenantId) -> SessionRef {
        SessionRef {
            session_id: SessionId::new(),
            tenant_id,
            case_file_id: CaseFileId::new(),
            therapist_id: UserId::new(),
        }
    }

    #[test]
    fn test_insert_lookup_remove() {
        let directory = MemorySessionDirectory::new();
        let s = session(TenantId::new());
        directory.insert(s.clone());

        assert_eq!(directory.lookup(s.session_id), Some(s.clone()));
        assert_eq!(directory.remove(s.session_id), Some(s.clone()));
        assert!(directory.lookup(s.session_id).is_none());
        assert!(directory.is_empty());
    }

    #[test]
    fn test_register_never_takes_over_another_tenants_session() {
        let directory = MemorySessionDirectory::new();
        let owned = session(TenantId::new());
        directory.register(owned.clone(), false).unwrap();

        let mut claim = owned.clone();
        claim.tenant_id = TenantId::new();
        claim.therapist_id = UserId::new();
        for replace in [false, true] {
            assert!(matches!(
                directory.register(claim.clone(), replace),
                Err(VaultError::TenantMismatch)
            ));
        }
        assert_eq!(directory.lookup(owned.session_id), Some(owned));
    }

    #[test]
    fn test_register_replaces_only_when_asked() {
        let directory = MemorySessionDirectory::new();
        let original = session(TenantId::new());
        directory.register(original.clone(), false).unwrap();

        let mut reassigned = original.clone();
        reassigned.therapist_id = UserId::new();
        assert!(matches!(
            directory.register(reassigned.clone(), false),
            Err(VaultError::AlreadyExists(_))
        ));
        assert_eq!(directory.lookup(original.session_id), Some(original));

        directory.register(reassigned.clone(), true).unwrap();
        assert_eq!(directory.lookup(reassigned.session_id), Some(reassigned));
    }

    #[test]
    fn test_for_tenant_filters() {
        let directory = MemorySessionDirectory::new();
        let tenant = TenantId::new();
        directory.insert(session(tenant));
        directory.insert(session(tenant));
        directory.insert(session(TenantId::new()));

        assert_eq!(directory.for_tenant(tenant).len(), 2);
        assert_eq!(directory.len(), 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/sessions.json");

        let directory = MemorySessionDirectory::new();
        let s = session(TenantId::new());
        directory.insert(s.clone());
        directory.save(&path).unwrap();

        let loaded = MemorySessionDirectory::load(&path).unwrap();
        assert_eq!(loaded.lookup(s.session_id), Some(s));
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = MemorySessionDirectory::load(&dir.path().join("none.json")).unwrap();
        assert!(loaded.is_empty());
    }
}
