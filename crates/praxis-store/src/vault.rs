//! The vault: key lifecycle and the note state machine behind one writer lock.
//!
//! Note lifecycle:
//! ```text
//! Draft ──finalize──▶ Finalized ──lock──▶ Locked
//!   ▲ │                                    (terminal: no update, finalize,
//!   └─┘ update (re-seal)                    delete; reads still work)
//! ```
//!
//! Checks run in a fixed order: access guard, then status, then the caller's
//! expected version. Every successful mutation bumps the note version by one.

use std::sync::Arc;
use std::time::Duration;

use praxis_core::config::{NoteUniqueness, PraxisConfig};
use praxis_core::{
    AuditAction, Clock, KeyId, NoteId, NoteStatus, NoteType, Principal, SessionId, SystemClock,
    Timestamp, VaultError, VaultResult,
};
use praxis_crypto::{fetch_with_timeout, open, seal, Algorithm, KeyCustodian, KeyMaterial};
use praxis_keyring::{KeyRecord, KeyRef, Rotation};
use serde_json::json;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::audit::{AuditEmitter, AuditEntry, AuditSink, EntityType};
use crate::guard::{enforce, Action, Target};
use crate::note::{note_aad, word_count, ClinicalNote, NoteMetadata};
use crate::session::{MemorySessionDirectory, SessionDirectory, SessionRef};
use crate::storage::{MemoryStorage, Storage, VaultState};

/// Behavior switches, normally taken from `PraxisConfig`
#[derive(Debug, Clone)]
pub struct VaultOptions {
    pub note_uniqueness: NoteUniqueness,
    pub allow_reseal_on_finalize: bool,
    /// Key name used when a caller does not name one
    pub default_key_name: String,
    /// Algorithm for keys provisioned without an explicit one
    pub default_algorithm: Algorithm,
    /// Lifetime of newly created key versions; None = no expiry
    pub default_key_ttl: Option<Duration>,
    pub custodian_timeout: Duration,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            note_uniqueness: NoteUniqueness::default(),
            allow_reseal_on_finalize: true,
            default_key_name: "clinical-notes".into(),
            default_algorithm: Algorithm::default(),
            default_key_ttl: None,
            custodian_timeout: Duration::from_millis(5000),
        }
    }
}

impl VaultOptions {
    pub fn from_config(config: &PraxisConfig) -> VaultResult<Self> {
        let default_algorithm: Algorithm = config.keys.algorithm.parse()?;
        Ok(Self {
            note_uniqueness: config.vault.note_uniqueness,
            allow_reseal_on_finalize: config.vault.allow_reseal_on_finalize,
            default_key_name: config.keys.default_key_name.clone(),
            default_algorithm,
            default_key_ttl: config.default_ttl_secs().map(Duration::from_secs),
            custodian_timeout: Duration::from_millis(config.keys.custodian_timeout_ms),
        })
    }

    fn expiry_from(&self, now: Timestamp) -> Option<Timestamp> {
        self.default_key_ttl
            .map(|ttl| now.saturating_add(ttl.as_secs()))
    }
}

/// Assembles a [`Vault`]. Only the custodian is required; everything else
/// defaults to an in-memory or system implementation.
pub struct VaultBuilder<C> {
    custodian: C,
    storage: Option<Box<dyn Storage>>,
    sessions: Option<Arc<dyn SessionDirectory>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    clock: Option<Arc<dyn Clock>>,
    options: VaultOptions,
}

impl<C: KeyCustodian> VaultBuilder<C> {
    pub fn new(custodian: C) -> Self {
        Self {
            custodian,
            storage: None,
            sessions: None,
            audit_sink: None,
            clock: None,
            options: VaultOptions::default(),
        }
    }

    pub fn storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Box::new(storage));
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionDirectory>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn options(mut self, options: VaultOptions) -> Self {
        self.options = options;
        self
    }

    /// Load the committed state and return a ready vault.
    pub fn open(self) -> VaultResult<Vault<C>> {
        let storage = self
            .storage
            .unwrap_or_else(|| Box::new(MemoryStorage::new()));
        let state = storage.load()?;

        tracing::info!(
            notes = state.notes.len(),
            keys = state.keys.keys.len(),
            audit_entries = state.audit.len(),
            "vault opened"
        );

        Ok(Vault {
            custodian: self.custodian,
            storage,
            sessions: self
                .sessions
                .unwrap_or_else(|| Arc::new(MemorySessionDirectory::new())),
            audit: self
                .audit_sink
                .map(AuditEmitter::new)
                .unwrap_or_default(),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            options: self.options,
            state: Mutex::new(state),
        })
    }
}

pub struct Vault<C> {
    custodian: C,
    storage: Box<dyn Storage>,
    sessions: Arc<dyn SessionDirectory>,
    audit: AuditEmitter,
    clock: Arc<dyn Clock>,
    options: VaultOptions,
    /// Single writer: every mutation holds this for its whole transaction
    state: Mutex<VaultState>,
}

impl<C: KeyCustodian> Vault<C> {
    pub fn builder(custodian: C) -> VaultBuilder<C> {
        VaultBuilder::new(custodian)
    }

    pub fn options(&self) -> &VaultOptions {
        &self.options
    }

    pub fn custodian(&self) -> &C {
        &self.custodian
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn session(&self, session_id: SessionId) -> VaultResult<SessionRef> {
        self.sessions
            .lookup(session_id)
            .ok_or_else(|| VaultError::NotFound(format!("session {session_id}")))
    }

    async fn material(&self, key_id: KeyId) -> VaultResult<KeyMaterial> {
        Ok(fetch_with_timeout(&self.custodian, key_id, self.options.custodian_timeout).await?)
    }

    async fn provision_material(&self, record: &KeyRecord) -> VaultResult<()> {
        let provision = self.custodian.provision(record.key_id, record.algorithm);
        match tokio::time::timeout(self.options.custodian_timeout, provision).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(VaultError::KeyUnavailable {
                key_id: record.key_id,
                reason: "custodian did not provision in time".into(),
            }),
        }
    }

    /// Forget material for a key version whose commit was aborted.
    async fn discard_material(&self, key_id: KeyId) {
        let discard = self.custodian.discard(key_id);
        match tokio::time::timeout(self.options.custodian_timeout, discard).await {
            Ok(Ok(())) => tracing::debug!(%key_id, "discarded material of uncommitted key"),
            Ok(Err(e)) => {
                tracing::warn!(%key_id, "could not discard material of uncommitted key: {e}")
            }
            Err(_) => tracing::warn!(%key_id, "custodian did not discard material in time"),
        }
    }

    /// Pick up commits made through the same storage by another vault.
    fn refresh(&self, state: &mut VaultState) -> VaultResult<()> {
        if let Some(stored) = self.storage.load_if_changed(state.generation)? {
            tracing::debug!(
                from = state.generation,
                to = stored.generation,
                "vault state reloaded from storage"
            );
            *state = stored;
        }
        Ok(())
    }

    /// Take the writer lock on a state that reflects the latest commit.
    async fn current(&self) -> VaultResult<MutexGuard<'_, VaultState>> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state)?;
        Ok(state)
    }

    /// Look a note up and authorize the principal against the note's own
    /// tenant and its session. Deleted notes are reported as missing, but
    /// only after the guard.
    fn authorized_note<'s>(
        &self,
        state: &'s VaultState,
        principal: &Principal,
        note_id: NoteId,
        action: Action,
    ) -> VaultResult<&'s ClinicalNote> {
        let note = state
            .notes
            .get(&note_id)
            .ok_or_else(|| VaultError::NotFound(format!("note {note_id}")))?;
        let session = self.session(note.session_id)?;
        enforce(
            principal,
            action,
            Target::Note {
                tenant_id: note.tenant_id,
                session: &session,
            },
        )?;

        if note.is_deleted {
            return Err(VaultError::NotFound(format!("note {note_id}")));
        }
        Ok(note)
    }

    fn check_version(note: &ClinicalNote, expected_version: u32) -> VaultResult<()> {
        if note.version != expected_version {
            return Err(VaultError::ConcurrentModification {
                expected: expected_version,
                actual: note.version,
            });
        }
        Ok(())
    }

    fn key_record(state: &VaultState, key_id: KeyId) -> VaultResult<KeyRecord> {
        state
            .keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(format!("key {key_id}")))
    }

    /// Seal content for an existing note under the key it was created with.
    async fn reseal(
        &self,
        state: &VaultState,
        note: &mut ClinicalNote,
        plaintext: &[u8],
    ) -> VaultResult<()> {
        let key = Self::key_record(state, note.key_id)?;
        let material = self.material(key.key_id).await?;
        note.envelope = seal(plaintext, &material, key.algorithm, Some(&note.expected_aad()))?;
        note.word_count = word_count(plaintext);
        Ok(())
    }

    /// Audit, persist, then publish the working copy as the new state.
    fn commit(
        &self,
        state: &mut VaultState,
        mut working: VaultState,
        entries: Vec<AuditEntry>,
    ) -> VaultResult<()> {
        working.generation = state.generation + 1;
        for entry in entries {
            self.audit.record(&mut working.audit, entry)?;
        }
        self.storage.commit(&working)?;
        *state = working;
        Ok(())
    }

    // ── key ring ─────────────────────────────────────────────────────────────

    /// Create version 1 of a named key for the principal's tenant.
    pub async fn provision_key(
        &self,
        principal: &Principal,
        key_name: &str,
        algorithm: Option<Algorithm>,
        notes: Option<String>,
    ) -> VaultResult<KeyRecord> {
        let tenant_id = principal.tenant_id;
        enforce(principal, Action::ManageKeys, Target::Tenant(tenant_id))?;

        let mut state = self.current().await?;
        let now = self.clock.now();
        let mut working = state.clone();

        let algorithm = algorithm.unwrap_or(self.options.default_algorithm);
        let record = working.keys.provision(
            tenant_id,
            key_name,
            algorithm,
            self.options.expiry_from(now),
            notes,
            now,
        )?;
        self.provision_material(&record).await?;

        let entry = AuditEntry::new(
            tenant_id,
            EntityType::KeyRing,
            *record.key_id.as_uuid(),
            AuditAction::Created,
            now,
        )
        .by(principal)
        .with_changes(json!({
            "key_name": key_name,
            "key_version": record.key_version,
            "algorithm": algorithm.identifier(),
            "expires_at": record.expires_at,
        }));
        if let Err(e) = self.commit(&mut state, working, vec![entry]) {
            self.discard_material(record.key_id).await;
            return Err(e);
        }

        Ok(record)
    }

    /// Retire the Active version of `key_name` and activate the next one.
    ///
    /// `expected_version` is the Active version the caller last saw; pass None
    /// to rotate whatever is current.
    pub async fn rotate_key(
        &self,
        principal: &Principal,
        key_name: &str,
        expected_version: Option<u32>,
    ) -> VaultResult<Rotation> {
        let tenant_id = principal.tenant_id;
        enforce(principal, Action::ManageKeys, Target::Tenant(tenant_id))?;

        let mut state = self.current().await?;
        let now = self.clock.now();
        let mut working = state.clone();

        let rotation = working.keys.rotate(
            tenant_id,
            key_name,
            expected_version,
            self.options.expiry_from(now),
            now,
        )?;
        self.provision_material(&rotation.activated).await?;

        let retired = AuditEntry::new(
            tenant_id,
            EntityType::KeyRing,
            *rotation.retired.key_id.as_uuid(),
            AuditAction::Archived,
            now,
        )
        .by(principal)
        .with_changes(json!({
            "key_name": key_name,
            "key_version": rotation.retired.key_version,
            "status": { "from": "Active", "to": "Retired" },
        }));
        let activated = AuditEntry::new(
            tenant_id,
            EntityType::KeyRing,
            *rotation.activated.key_id.as_uuid(),
            AuditAction::Created,
            now,
        )
        .by(principal)
        .with_changes(json!({
            "key_name": key_name,
            "key_version": rotation.activated.key_version,
            "algorithm": rotation.activated.algorithm.identifier(),
            "supersedes": rotation.retired.key_id,
            "expires_at": rotation.activated.expires_at,
        }));
        if let Err(e) = self.commit(&mut state, working, vec![retired, activated]) {
            self.discard_material(rotation.activated.key_id).await;
            return Err(e);
        }

        Ok(rotation)
    }

    /// The key a new note for this tenant would be sealed under.
    pub async fn resolve_active_key(
        &self,
        principal: &Principal,
        key_name: &str,
    ) -> VaultResult<KeyRef> {
        enforce(principal, Action::ListKeys, Target::Tenant(principal.tenant_id))?;
        let state = self.current().await?;
        state
            .keys
            .resolve_active(principal.tenant_id, key_name, self.clock.now())
    }

    /// Every version of `key_name`, oldest first.
    pub async fn key_history(
        &self,
        principal: &Principal,
        key_name: &str,
    ) -> VaultResult<Vec<KeyRecord>> {
        enforce(principal, Action::ListKeys, Target::Tenant(principal.tenant_id))?;
        let state = self.current().await?;
        Ok(state
            .keys
            .history(principal.tenant_id, key_name)
            .into_iter()
            .cloned()
            .collect())
    }

    /// All key versions of the principal's tenant.
    pub async fn list_keys(&self, principal: &Principal) -> VaultResult<Vec<KeyRecord>> {
        enforce(principal, Action::ListKeys, Target::Tenant(principal.tenant_id))?;
        let state = self.current().await?;
        Ok(state
            .keys
            .for_tenant(principal.tenant_id)
            .cloned()
            .collect())
    }

    // ── notes ────────────────────────────────────────────────────────────────

    /// Seal a new Draft note under the tenant's Active key.
    pub async fn create_note(
        &self,
        principal: &Principal,
        session_id: SessionId,
        note_type: NoteType,
        plaintext: &[u8],
        key_name: Option<&str>,
    ) -> VaultResult<NoteId> {
        let session = self.session(session_id)?;
        enforce(principal, Action::CreateNote, Target::Session(&session))?;

        let mut state = self.current().await?;
        let now = self.clock.now();

        let duplicate = state.notes.values().any(|n| {
            n.is_live()
                && n.session_id == session_id
                && n.tenant_id == session.tenant_id
                && match self.options.note_uniqueness {
                    NoteUniqueness::SessionAndType => n.note_type == note_type,
                    NoteUniqueness::Session => true,
                }
        });
        if duplicate {
            return Err(VaultError::DuplicateNoteType {
                session_id,
                note_type,
            });
        }

        let key_name = key_name.unwrap_or(&self.options.default_key_name);
        let key = state.keys.resolve_active(session.tenant_id, key_name, now)?;
        let material = self.material(key.key_id).await?;

        let note_id = NoteId::new();
        let aad = note_aad(session_id, note_id, note_type);
        let envelope = seal(plaintext, &material, key.algorithm, Some(&aad))?;
        drop(material);

        let note = ClinicalNote {
            note_id,
            tenant_id: session.tenant_id,
            session_id,
            key_id: key.key_id,
            note_type,
            envelope,
            status: NoteStatus::Draft,
            finalized_at: None,
            finalized_by: None,
            locked_at: None,
            locked_by: None,
            word_count: word_count(plaintext),
            created_at: now,
            updated_at: now,
            version: 1,
            is_deleted: false,
            deleted_at: None,
        };

        let entry = AuditEntry::new(
            session.tenant_id,
            EntityType::ClinicalNote,
            *note_id.as_uuid(),
            AuditAction::Created,
            now,
        )
        .by(principal)
        .with_changes(json!({
            "session_id": session_id,
            "note_type": note_type.as_str(),
            "status": NoteStatus::Draft.as_str(),
            "key_id": key.key_id,
            "key_version": key.key_version,
            "word_count": note.word_count,
            "version": 1,
        }));

        let mut working = state.clone();
        working.notes.insert(note_id, note);
        self.commit(&mut state, working, vec![entry])?;

        tracing::info!(%note_id, %session_id, %note_type, key_id = %key.key_id, "note created");
        Ok(note_id)
    }

    /// Replace a Draft's content. Returns the new version.
    pub async fn update_note(
        &self,
        principal: &Principal,
        note_id: NoteId,
        expected_version: u32,
        plaintext: &[u8],
    ) -> VaultResult<u32> {
        let mut state = self.current().await?;
        let now = self.clock.now();

        let mut note = self
            .authorized_note(&state, principal, note_id, Action::UpdateNote)?
            .clone();
        if note.status != NoteStatus::Draft {
            return Err(VaultError::NoteLocked(note_id));
        }
        Self::check_version(&note, expected_version)?;

        self.reseal(&state, &mut note, plaintext).await?;
        note.version += 1;
        note.updated_at = now;

        let entry = AuditEntry::new(
            note.tenant_id,
            EntityType::ClinicalNote,
            *note_id.as_uuid(),
            AuditAction::Updated,
            now,
        )
        .by(principal)
        .with_changes(json!({
            "version": { "from": expected_version, "to": note.version },
            "word_count": note.word_count,
        }));

        let version = note.version;
        let mut working = state.clone();
        working.notes.insert(note_id, note);
        self.commit(&mut state, working, vec![entry])?;

        tracing::info!(%note_id, version, "note updated");
        Ok(version)
    }

    /// Draft → Finalized, optionally re-sealing revised content first.
    pub async fn finalize_note(
        &self,
        principal: &Principal,
        note_id: NoteId,
        expected_version: u32,
        revised: Option<&[u8]>,
    ) -> VaultResult<u32> {
        let mut state = self.current().await?;
        let now = self.clock.now();

        let mut note = self
            .authorized_note(&state, principal, note_id, Action::FinalizeNote)?
            .clone();
        match note.status {
            NoteStatus::Locked => return Err(VaultError::NoteLocked(note_id)),
            from if !from.can_transition_to(NoteStatus::Finalized) => {
                return Err(VaultError::InvalidTransition {
                    from,
                    to: NoteStatus::Finalized,
                })
            }
            _ => {}
        }
        Self::check_version(&note, expected_version)?;

        if let Some(content) = revised {
            if !self.options.allow_reseal_on_finalize {
                return Err(VaultError::ResealNotPermitted);
            }
            self.reseal(&state, &mut note, content).await?;
        }

        note.status = NoteStatus::Finalized;
        note.finalized_at = Some(now);
        note.finalized_by = Some(principal.user_id);
        note.version += 1;
        note.updated_at = now;

        let entry = AuditEntry::new(
            note.tenant_id,
            EntityType::ClinicalNote,
            *note_id.as_uuid(),
            AuditAction::Updated,
            now,
        )
        .by(principal)
        .with_changes(json!({
            "status": { "from": NoteStatus::Draft.as_str(), "to": NoteStatus::Finalized.as_str() },
            "version": { "from": expected_version, "to": note.version },
            "resealed": revised.is_some(),
        }));

        let version = note.version;
        let mut working = state.clone();
        working.notes.insert(note_id, note);
        self.commit(&mut state, working, vec![entry])?;

        tracing::info!(%note_id, version, resealed = revised.is_some(), "note finalized");
        Ok(version)
    }

    /// Finalized → Locked. Locked is terminal.
    pub async fn lock_note(
        &self,
        principal: &Principal,
        note_id: NoteId,
        expected_version: u32,
    ) -> VaultResult<u32> {
        let mut state = self.current().await?;
        let now = self.clock.now();

        let mut note = self
            .authorized_note(&state, principal, note_id, Action::LockNote)?
            .clone();
        if !note.status.can_transition_to(NoteStatus::Locked) {
            return Err(VaultError::InvalidTransition {
                from: note.status,
                to: NoteStatus::Locked,
            });
        }
        Self::check_version(&note, expected_version)?;

        note.status = NoteStatus::Locked;
        note.locked_at = Some(now);
        note.locked_by = Some(principal.user_id);
        note.version += 1;
        note.updated_at = now;

        let entry = AuditEntry::new(
            note.tenant_id,
            EntityType::ClinicalNote,
            *note_id.as_uuid(),
            AuditAction::Locked,
            now,
        )
        .by(principal)
        .with_changes(json!({
            "status": { "from": NoteStatus::Finalized.as_str(), "to": NoteStatus::Locked.as_str() },
            "version": { "from": expected_version, "to": note.version },
        }));

        let version = note.version;
        let mut working = state.clone();
        working.notes.insert(note_id, note);
        self.commit(&mut state, working, vec![entry])?;

        tracing::info!(%note_id, version, "note locked");
        Ok(version)
    }

    /// Soft-delete a Draft or Finalized note.
    pub async fn delete_note(
        &self,
        principal: &Principal,
        note_id: NoteId,
        expected_version: u32,
    ) -> VaultResult<()> {
        let mut state = self.current().await?;
        let now = self.clock.now();

        let mut note = self
            .authorized_note(&state, principal, note_id, Action::DeleteNote)?
            .clone();
        if note.status == NoteStatus::Locked {
            return Err(VaultError::NoteLocked(note_id));
        }
        Self::check_version(&note, expected_version)?;

        note.is_deleted = true;
        note.deleted_at = Some(now);
        note.version += 1;
        note.updated_at = now;

        let entry = AuditEntry::new(
            note.tenant_id,
            EntityType::ClinicalNote,
            *note_id.as_uuid(),
            AuditAction::Deleted,
            now,
        )
        .by(principal)
        .with_changes(json!({
            "status": note.status.as_str(),
            "version": { "from": expected_version, "to": note.version },
        }));

        let mut working = state.clone();
        working.notes.insert(note_id, note);
        self.commit(&mut state, working, vec![entry])?;

        tracing::info!(%note_id, "note deleted");
        Ok(())
    }

    /// Decrypt a note with the key it was sealed under, whatever that key's status.
    pub async fn read_note(&self, principal: &Principal, note_id: NoteId) -> VaultResult<Vec<u8>> {
        let (envelope, key_id) = {
            let state = self.current().await?;
            let note = self.authorized_note(&state, principal, note_id, Action::ReadNote)?;
            Self::key_record(&state, note.key_id)?;
            (note.envelope_for_open(), note.key_id)
        };

        let material = self.material(key_id).await?;
        let plaintext = open(&envelope, &material).map_err(|e| {
            tracing::warn!(target: "praxis::security", %note_id, %key_id, "note failed integrity check: {e}");
            VaultError::from(e)
        })?;

        tracing::debug!(%note_id, user_id = %principal.user_id, "note read");
        Ok(plaintext)
    }

    /// Note bookkeeping without decrypting anything.
    pub async fn note_metadata(
        &self,
        principal: &Principal,
        note_id: NoteId,
    ) -> VaultResult<NoteMetadata> {
        let state = self.current().await?;
        let note = self.authorized_note(&state, principal, note_id, Action::ViewNoteMetadata)?;
        Ok(note.metadata())
    }

    /// Live notes of a session, oldest first.
    pub async fn notes_for_session(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> VaultResult<Vec<NoteMetadata>> {
        let session = self.session(session_id)?;
        enforce(principal, Action::ViewNoteMetadata, Target::Session(&session))?;

        let state = self.current().await?;
        let mut notes: Vec<NoteMetadata> = state
            .notes
            .values()
            .filter(|n| {
                n.is_live() && n.session_id == session_id && n.tenant_id == session.tenant_id
            })
            .map(ClinicalNote::metadata)
            .collect();
        notes.sort_by_key(|n| (n.created_at, n.note_id));
        Ok(notes)
    }

    // ── audit ────────────────────────────────────────────────────────────────

    /// The tenant's audit entries in commit order, optionally for one entity.
    pub async fn audit_trail(
        &self,
        principal: &Principal,
        entity_id: Option<Uuid>,
    ) -> VaultResult<Vec<AuditEntry>> {
        enforce(principal, Action::ReadAudit, Target::Tenant(principal.tenant_id))?;
        let state = self.current().await?;
        Ok(state
            .audit
            .iter()
            .filter(|e| e.tenant_id == principal.tenant_id)
            .filter(|e| entity_id.is_none_or(|id| e.entity_id == id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use praxis_core::{CaseFileId, ManualClock, Role, TenantId, UserId};
    use praxis_crypto::MemoryCustodian;

    struct Fixture {
        vault: Vault<MemoryCustodian>,
        owner: Principal,
        therapist: Principal,
        session_id: SessionId,
        clock: ManualClock,
    }

    async fn fixture(options: VaultOptions) -> Fixture {
        let tenant = TenantId::new();
        let therapist = Principal::new(UserId::new(), tenant, Role::Therapist);
        let owner = Principal::new(UserId::new(), tenant, Role::Owner);
        let session_id = SessionId::new();

        let sessions = Arc::new(MemorySessionDirectory::new());
        sessions.insert(SessionRef {
            session_id,
            tenant_id: tenant,
            case_file_id: CaseFileId::new(),
            therapist_id: therapist.user_id,
        });

        let clock = ManualClock::new(1_700_000_000);
        let vault = Vault::builder(MemoryCustodian::new())
            .sessions(sessions)
            .clock(Arc::new(clock.clone()))
            .options(options)
            .open()
            .unwrap();
        vault
            .provision_key(&owner, "clinical-notes", None, None)
            .await
            .unwrap();

        Fixture {
            vault,
            owner,
            therapist,
            session_id,
            clock,
        }
    }

    #[tokio::test]
    async fn test_finalize_twice_is_invalid_transition() {
        let f = fixture(VaultOptions::default()).await;
        let id = f
            .vault
            .create_note(&f.therapist, f.session_id, NoteType::Progress, b"x", None)
            .await
            .unwrap();
        let v = f.vault.finalize_note(&f.therapist, id, 1, None).await.unwrap();

        let err = f
            .vault
            .finalize_note(&f.therapist, id, v, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VaultError::InvalidTransition {
                from: NoteStatus::Finalized,
                to: NoteStatus::Finalized
            }
        ));
    }

    #[tokio::test]
    async fn test_lock_draft_is_invalid_transition() {
        let f = fixture(VaultOptions::default()).await;
        let id = f
            .vault
            .create_note(&f.therapist, f.session_id, NoteType::Progress, b"x", None)
            .await
            .unwrap();

        let err = f.vault.lock_note(&f.therapist, id, 1).await.unwrap_err();
        assert!(matches!(
            err,
            VaultError::InvalidTransition {
                from: NoteStatus::Draft,
                to: NoteStatus::Locked
            }
        ));
    }

    #[tokio::test]
    async fn test_status_checked_before_version() {
        let f = fixture(VaultOptions::default()).await;
        let id = f
            .vault
            .create_note(&f.therapist, f.session_id, NoteType::Progress, b"x", None)
            .await
            .unwrap();

        // Stale version and wrong state: the state error wins
        let err = f.vault.lock_note(&f.therapist, id, 99).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_reseal_on_finalize_can_be_disabled() {
        let options = VaultOptions {
            allow_reseal_on_finalize: false,
            ..VaultOptions::default()
        };
        let f = fixture(options).await;
        let id = f
            .vault
            .create_note(&f.therapist, f.session_id, NoteType::Soap, b"draft", None)
            .await
            .unwrap();

        let err = f
            .vault
            .finalize_note(&f.therapist, id, 1, Some(&b"revised"[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::ResealNotPermitted));

        // Status-only finalize still works
        f.vault.finalize_note(&f.therapist, id, 1, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_finalize_with_revision_reseals() {
        let f = fixture(VaultOptions::default()).await;
        let id = f
            .vault
            .create_note(&f.therapist, f.session_id, NoteType::Soap, b"draft", None)
            .await
            .unwrap();
        f.vault
            .finalize_note(&f.therapist, id, 1, Some(&b"final wording here"[..]))
            .await
            .unwrap();

        assert_eq!(
            f.vault.read_note(&f.therapist, id).await.unwrap(),
            b"final wording here"
        );
        let meta = f.vault.note_metadata(&f.therapist, id).await.unwrap();
        assert_eq!(meta.status, NoteStatus::Finalized);
        assert_eq!(meta.word_count, Some(3));
        assert_eq!(meta.finalized_by, Some(f.therapist.user_id));
    }

    #[tokio::test]
    async fn test_session_uniqueness_policy() {
        let options = VaultOptions {
            note_uniqueness: NoteUniqueness::Session,
            ..VaultOptions::default()
        };
        let f = fixture(options).await;
        f.vault
            .create_note(&f.therapist, f.session_id, NoteType::Progress, b"a", None)
            .await
            .unwrap();

        let err = f
            .vault
            .create_note(&f.therapist, f.session_id, NoteType::Intake, b"b", None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::DuplicateNoteType { .. }));
    }

    #[tokio::test]
    async fn test_deleted_note_frees_its_slot() {
        let f = fixture(VaultOptions::default()).await;
        let id = f
            .vault
            .create_note(&f.therapist, f.session_id, NoteType::Dap, b"a", None)
            .await
            .unwrap();
        f.vault.delete_note(&f.therapist, id, 1).await.unwrap();

        assert!(matches!(
            f.vault.read_note(&f.therapist, id).await,
            Err(VaultError::NotFound(_))
        ));
        f.vault
            .create_note(&f.therapist, f.session_id, NoteType::Dap, b"b", None)
            .await
            .unwrap();
        assert_eq!(
            f.vault
                .notes_for_session(&f.therapist, f.session_id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let f = fixture(VaultOptions::default()).await;
        let err = f
            .vault
            .create_note(&f.owner, SessionId::new(), NoteType::Intake, b"x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_key_ttl_applied_from_options() {
        let options = VaultOptions {
            default_key_ttl: Some(Duration::from_secs(3_600)),
            ..VaultOptions::default()
        };
        let f = fixture(options).await;
        let history = f
            .vault
            .key_history(&f.owner, "clinical-notes")
            .await
            .unwrap();
        assert_eq!(history[0].expires_at, Some(1_700_000_000 + 3_600));

        f.clock.advance(3_600);
        let err = f
            .vault
            .create_note(&f.therapist, f.session_id, NoteType::Intake, b"x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::KeyExpired { .. }));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = PraxisConfig::default();
        config.keys.algorithm = "XCHACHA20-POLY1305".into();
        config.keys.default_ttl_days = Some(2);
        config.keys.custodian_timeout_ms = 50;

        let options = VaultOptions::from_config(&config).unwrap();
        assert_eq!(options.default_algorithm, Algorithm::XChaCha20Poly1305);
        assert_eq!(options.default_key_ttl, Some(Duration::from_secs(2 * 86_400)));
        assert_eq!(options.custodian_timeout, Duration::from_millis(50));

        config.keys.algorithm = "DES".into();
        assert!(matches!(
            VaultOptions::from_config(&config),
            Err(VaultError::UnknownAlgorithm(_))
        ));
    }
}
