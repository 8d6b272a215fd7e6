//! End-to-end note lifecycle through the vault: state machine, key rotation,
//! concurrency, tenant isolation and audit trail.

use std::sync::Arc;

use praxis_core::{
    AuditAction, CaseFileId, KeyStatus, ManualClock, NoteId, NoteStatus, NoteType, Principal,
    Role, SessionId, TenantId, UserId, VaultError,
};
use praxis_crypto::MemoryCustodian;
use praxis_store::{
    EntityType, MemoryAuditSink, MemorySessionDirectory, SessionDirectory, SessionRef, Vault,
    VaultOptions,
};

const KEY: &str = "clinical-notes";
const NOTE: &[u8] = b"Client reports improved mood.";

struct Practice {
    vault: Arc<Vault<MemoryCustodian>>,
    sessions: Arc<MemorySessionDirectory>,
    audit: MemoryAuditSink,
    clock: ManualClock,
    tenant: TenantId,
    owner: Principal,
    therapist: Principal,
    session_id: SessionId,
}

impl Practice {
    async fn new() -> Self {
        let tenant = TenantId::new();
        let owner = Principal::new(UserId::new(), tenant, Role::Owner);
        let therapist = Principal::new(UserId::new(), tenant, Role::Therapist);
        let session_id = SessionId::new();

        let sessions = Arc::new(MemorySessionDirectory::new());
        sessions.insert(SessionRef {
            session_id,
            tenant_id: tenant,
            case_file_id: CaseFileId::new(),
            therapist_id: therapist.user_id,
        });

        let audit = MemoryAuditSink::new();
        let clock = ManualClock::new(1_750_000_000);
        let vault = Vault::builder(MemoryCustodian::new())
            .sessions(sessions.clone())
            .audit_sink(Arc::new(audit.clone()))
            .clock(Arc::new(clock.clone()))
            .options(VaultOptions::default())
            .open()
            .unwrap();
        vault.provision_key(&owner, KEY, None, None).await.unwrap();

        Self {
            vault: Arc::new(vault),
            sessions,
            audit,
            clock,
            tenant,
            owner,
            therapist,
            session_id,
        }
    }

    async fn draft(&self, note_type: NoteType, text: &[u8]) -> NoteId {
        self.vault
            .create_note(&self.therapist, self.session_id, note_type, text, None)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn improved_mood_scenario() {
    let p = Practice::new().await;

    let id = p.draft(NoteType::Progress, NOTE).await;
    let v = p.vault.finalize_note(&p.therapist, id, 1, None).await.unwrap();
    assert_eq!(v, 2);
    let v = p.vault.lock_note(&p.therapist, id, v).await.unwrap();
    assert_eq!(v, 3);

    let err = p
        .vault
        .update_note(&p.therapist, id, v, b"Client reports worse mood.")
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::NoteLocked(n) if n == id));

    assert_eq!(p.vault.read_note(&p.therapist, id).await.unwrap(), NOTE);

    let meta = p.vault.note_metadata(&p.therapist, id).await.unwrap();
    assert_eq!(meta.status, NoteStatus::Locked);
    assert_eq!(meta.version, 3);
    assert_eq!(meta.locked_by, Some(p.therapist.user_id));
    assert_eq!(meta.word_count, Some(4));
}

#[tokio::test]
async fn locked_note_is_immutable_but_readable() {
    let p = Practice::new().await;
    let id = p.draft(NoteType::Soap, NOTE).await;
    p.vault.finalize_note(&p.therapist, id, 1, None).await.unwrap();
    p.vault.lock_note(&p.therapist, id, 2).await.unwrap();
    let before = p.vault.note_metadata(&p.owner, id).await.unwrap();

    assert!(matches!(
        p.vault.update_note(&p.therapist, id, 3, b"edit").await,
        Err(VaultError::NoteLocked(_))
    ));
    assert!(matches!(
        p.vault
            .finalize_note(&p.therapist, id, 3, Some(&b"edit"[..]))
            .await,
        Err(VaultError::NoteLocked(_))
    ));
    assert!(matches!(
        p.vault.delete_note(&p.owner, id, 3).await,
        Err(VaultError::NoteLocked(_))
    ));
    assert!(matches!(
        p.vault.lock_note(&p.therapist, id, 3).await,
        Err(VaultError::InvalidTransition {
            from: NoteStatus::Locked,
            to: NoteStatus::Locked
        })
    ));

    let after = p.vault.note_metadata(&p.owner, id).await.unwrap();
    assert_eq!(before, after);
    assert_eq!(p.vault.read_note(&p.owner, id).await.unwrap(), NOTE);
}

#[tokio::test]
async fn finalized_note_rejects_content_update() {
    let p = Practice::new().await;
    let id = p.draft(NoteType::Birp, NOTE).await;
    p.vault.finalize_note(&p.therapist, id, 1, None).await.unwrap();

    assert!(matches!(
        p.vault.update_note(&p.therapist, id, 2, b"late edit").await,
        Err(VaultError::NoteLocked(_))
    ));
}

#[tokio::test]
async fn draft_updates_bump_version_and_reseal() {
    let p = Practice::new().await;
    let id = p.draft(NoteType::Intake, b"first").await;

    let v = p
        .vault
        .update_note(&p.therapist, id, 1, b"second draft")
        .await
        .unwrap();
    assert_eq!(v, 2);
    assert_eq!(
        p.vault.read_note(&p.therapist, id).await.unwrap(),
        b"second draft"
    );

    let err = p
        .vault
        .update_note(&p.therapist, id, 1, b"stale")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VaultError::ConcurrentModification {
            expected: 1,
            actual: 2
        }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn duplicate_note_type_per_session() {
    let p = Practice::new().await;
    p.draft(NoteType::Dap, b"one").await;

    let err = p
        .vault
        .create_note(&p.therapist, p.session_id, NoteType::Dap, b"two", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VaultError::DuplicateNoteType {
            note_type: NoteType::Dap,
            ..
        }
    ));

    // A different type in the same session is fine
    p.draft(NoteType::Termination, b"three").await;
}

#[tokio::test]
async fn rotation_keeps_old_notes_on_old_key() {
    let p = Practice::new().await;
    let first_key = p.vault.resolve_active_key(&p.owner, KEY).await.unwrap();
    let old_note = p.draft(NoteType::Progress, b"before rotation").await;

    let rotation = p
        .vault
        .rotate_key(&p.owner, KEY, Some(first_key.key_version))
        .await
        .unwrap();
    assert_eq!(rotation.retired.key_id, first_key.key_id);
    assert_eq!(rotation.activated.key_version, 2);

    let new_note = p.draft(NoteType::Intake, b"after rotation").await;

    let old_meta = p.vault.note_metadata(&p.therapist, old_note).await.unwrap();
    let new_meta = p.vault.note_metadata(&p.therapist, new_note).await.unwrap();
    assert_eq!(old_meta.key_id, first_key.key_id);
    assert_eq!(new_meta.key_id, rotation.activated.key_id);

    // Old note still decrypts, and a draft under the retired key re-seals with it
    assert_eq!(
        p.vault.read_note(&p.therapist, old_note).await.unwrap(),
        b"before rotation"
    );
    p.vault
        .update_note(&p.therapist, old_note, 1, b"edited after rotation")
        .await
        .unwrap();
    let old_meta = p.vault.note_metadata(&p.therapist, old_note).await.unwrap();
    assert_eq!(old_meta.key_id, first_key.key_id);

    let history = p.vault.key_history(&p.owner, KEY).await.unwrap();
    let statuses: Vec<(u32, KeyStatus)> =
        history.iter().map(|k| (k.key_version, k.status)).collect();
    assert_eq!(
        statuses,
        vec![(1, KeyStatus::Retired), (2, KeyStatus::Active)]
    );
}

#[tokio::test]
async fn concurrent_rotations_from_same_observation() {
    let p = Practice::new().await;
    let observed = p.vault.resolve_active_key(&p.owner, KEY).await.unwrap();

    let (a, b) = tokio::join!(
        p.vault.rotate_key(&p.owner, KEY, Some(observed.key_version)),
        p.vault.rotate_key(&p.owner, KEY, Some(observed.key_version)),
    );
    let outcomes = [a.is_ok(), b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);

    let loser = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
    assert!(matches!(loser, VaultError::ConcurrentModification { .. }));
    assert_eq!(p.vault.key_history(&p.owner, KEY).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_updates_from_same_version() {
    let p = Practice::new().await;
    let id = p.draft(NoteType::Progress, b"v1").await;

    let mut handles = Vec::new();
    for text in ["writer a", "writer b"] {
        let vault = p.vault.clone();
        let therapist = p.therapist.clone();
        handles.push(tokio::spawn(async move {
            vault.update_note(&therapist, id, 1, text.as_bytes()).await
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(version) => {
                assert_eq!(version, 2);
                ok += 1;
            }
            Err(VaultError::ConcurrentModification { expected: 1, actual: 2 }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((ok, conflicts), (1, 1));
}

/// Every operation on an existing note, attempted with the version the note
/// really has so only the guard can stop it.
async fn note_operations(
    vault: &Vault<MemoryCustodian>,
    who: &Principal,
    id: NoteId,
) -> Vec<(&'static str, VaultError)> {
    vec![
        ("read", vault.read_note(who, id).await.unwrap_err()),
        ("metadata", vault.note_metadata(who, id).await.unwrap_err()),
        ("update", vault.update_note(who, id, 1, b"x").await.unwrap_err()),
        ("finalize", vault.finalize_note(who, id, 1, None).await.unwrap_err()),
        ("lock", vault.lock_note(who, id, 1).await.unwrap_err()),
        ("delete", vault.delete_note(who, id, 1).await.unwrap_err()),
    ]
}

#[tokio::test]
async fn tenant_isolation_regardless_of_role() {
    let p = Practice::new().await;
    let id = p.draft(NoteType::Progress, NOTE).await;
    let trail_before = p.vault.audit_trail(&p.owner, None).await.unwrap();

    for role in [
        Role::Owner,
        Role::Admin,
        Role::Therapist,
        Role::Biller,
        Role::Staff,
        Role::ReadOnly,
    ] {
        let outsider = Principal::new(p.therapist.user_id, TenantId::new(), role);
        for (operation, err) in note_operations(&p.vault, &outsider, id).await {
            assert!(
                matches!(err, VaultError::TenantMismatch),
                "{role} {operation}: {err}"
            );
            assert!(err.is_security_event());
        }
        assert!(matches!(
            p.vault.notes_for_session(&outsider, p.session_id).await,
            Err(VaultError::TenantMismatch)
        ));
        assert!(matches!(
            p.vault
                .create_note(&outsider, p.session_id, NoteType::Intake, b"x", None)
                .await,
            Err(VaultError::TenantMismatch)
        ));
    }

    let meta = p.vault.note_metadata(&p.therapist, id).await.unwrap();
    assert_eq!(meta.version, 1);
    assert_eq!(meta.status, NoteStatus::Draft);
    assert_eq!(p.vault.read_note(&p.therapist, id).await.unwrap(), NOTE);
    assert_eq!(
        p.vault.audit_trail(&p.owner, None).await.unwrap(),
        trail_before
    );

    // Another tenant's key ring and audit trail are separate
    let other_owner = Principal::new(UserId::new(), TenantId::new(), Role::Owner);
    assert!(matches!(
        p.vault.resolve_active_key(&other_owner, KEY).await,
        Err(VaultError::NoActiveKey { .. })
    ));
    assert!(p
        .vault
        .audit_trail(&other_owner, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn reregistered_session_does_not_move_notes_across_tenants() {
    let p = Practice::new().await;
    let id = p.draft(NoteType::Progress, NOTE).await;
    let trail_before = p.vault.audit_trail(&p.owner, None).await.unwrap();

    // Another practice claims the session id in the directory
    let intruder_tenant = TenantId::new();
    let intruder = Principal::new(UserId::new(), intruder_tenant, Role::Admin);
    let mut hijacked = p.sessions.lookup(p.session_id).unwrap();
    hijacked.tenant_id = intruder_tenant;
    hijacked.therapist_id = intruder.user_id;
    p.sessions.insert(hijacked);

    for (operation, err) in note_operations(&p.vault, &intruder, id).await {
        assert!(
            matches!(err, VaultError::TenantMismatch),
            "{operation}: {err}"
        );
    }
    // The directory now places the session in the intruder's tenant, but the
    // notes stored under it stay with their own tenant
    assert!(p
        .vault
        .notes_for_session(&intruder, p.session_id)
        .await
        .unwrap()
        .is_empty());

    // The owning practice is refused too until the directory agrees again
    assert!(matches!(
        p.vault.read_note(&p.owner, id).await,
        Err(VaultError::TenantMismatch)
    ));

    let mut restored = p.sessions.lookup(p.session_id).unwrap();
    restored.tenant_id = p.tenant;
    restored.therapist_id = p.therapist.user_id;
    p.sessions.insert(restored);

    let meta = p.vault.note_metadata(&p.therapist, id).await.unwrap();
    assert_eq!(meta.version, 1);
    assert_eq!(p.vault.read_note(&p.therapist, id).await.unwrap(), NOTE);
    assert_eq!(
        p.vault.audit_trail(&p.owner, None).await.unwrap(),
        trail_before
    );
}

#[tokio::test]
async fn other_roles_within_tenant() {
    let p = Practice::new().await;
    let id = p.draft(NoteType::Progress, NOTE).await;

    let colleague = Principal::new(UserId::new(), p.tenant, Role::Therapist);
    assert!(matches!(
        p.vault.read_note(&colleague, id).await,
        Err(VaultError::Unauthorized(_))
    ));

    let biller = Principal::new(UserId::new(), p.tenant, Role::Biller);
    assert!(matches!(
        p.vault.note_metadata(&biller, id).await,
        Err(VaultError::Unauthorized(_))
    ));

    assert!(matches!(
        p.vault.rotate_key(&p.therapist, KEY, None).await,
        Err(VaultError::Unauthorized(_))
    ));
    assert!(matches!(
        p.vault.audit_trail(&p.therapist, None).await,
        Err(VaultError::Unauthorized(_))
    ));

    let admin = Principal::new(UserId::new(), p.tenant, Role::Admin);
    assert_eq!(p.vault.read_note(&admin, id).await.unwrap(), NOTE);
}

#[tokio::test]
async fn therapist_reassignment_is_seen_on_next_call() {
    let p = Practice::new().await;
    let id = p.draft(NoteType::Progress, NOTE).await;

    let successor = Principal::new(UserId::new(), p.tenant, Role::Therapist);
    let mut session = p.sessions.for_tenant(p.tenant).remove(0);
    session.therapist_id = successor.user_id;
    p.sessions.insert(session);

    assert!(p.vault.read_note(&successor, id).await.is_ok());
    assert!(matches!(
        p.vault.read_note(&p.therapist, id).await,
        Err(VaultError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn audit_trail_records_every_mutation_without_content() {
    let p = Practice::new().await;
    let id = p.draft(NoteType::Progress, NOTE).await;
    p.vault.finalize_note(&p.therapist, id, 1, None).await.unwrap();
    p.vault.lock_note(&p.therapist, id, 2).await.unwrap();
    p.vault.rotate_key(&p.owner, KEY, None).await.unwrap();

    let trail = p.vault.audit_trail(&p.owner, None).await.unwrap();
    let actions: Vec<(EntityType, AuditAction)> =
        trail.iter().map(|e| (e.entity_type, e.action)).collect();
    assert_eq!(
        actions,
        vec![
            (EntityType::KeyRing, AuditAction::Created),
            (EntityType::ClinicalNote, AuditAction::Created),
            (EntityType::ClinicalNote, AuditAction::Updated),
            (EntityType::ClinicalNote, AuditAction::Locked),
            (EntityType::KeyRing, AuditAction::Archived),
            (EntityType::KeyRing, AuditAction::Created),
        ]
    );

    // Sink saw exactly what the store kept
    assert_eq!(p.audit.entries(), trail);

    for entry in &trail {
        assert_eq!(entry.tenant_id, p.tenant);
        let changes = entry.changes_json.as_deref().unwrap_or_default();
        assert!(!changes.contains("improved mood"));
    }

    let note_trail = p
        .vault
        .audit_trail(&p.owner, Some(*id.as_uuid()))
        .await
        .unwrap();
    assert_eq!(note_trail.len(), 3);
    assert!(note_trail
        .iter()
        .all(|e| e.user_id == Some(p.therapist.user_id)));
}

#[tokio::test]
async fn key_expiry_is_evaluated_at_resolve_time() {
    let p = Practice::new().await;
    let id = p.draft(NoteType::Progress, NOTE).await;

    // No sweep runs; a stored Active key only reports Expired once the clock passes it
    let options = VaultOptions {
        default_key_ttl: Some(std::time::Duration::from_secs(60)),
        ..VaultOptions::default()
    };
    let vault = Vault::builder(MemoryCustodian::new())
        .sessions(p.sessions.clone())
        .clock(Arc::new(p.clock.clone()))
        .options(options)
        .open()
        .unwrap();
    vault.provision_key(&p.owner, KEY, None, None).await.unwrap();

    p.clock.advance(59);
    assert!(vault.resolve_active_key(&p.owner, KEY).await.is_ok());
    p.clock.advance(1);
    assert!(matches!(
        vault.resolve_active_key(&p.owner, KEY).await,
        Err(VaultError::KeyExpired { .. })
    ));

    // Rotating an expired key is the recovery path
    vault.rotate_key(&p.owner, KEY, None).await.unwrap();
    assert!(vault.resolve_active_key(&p.owner, KEY).await.is_ok());

    // The first vault never had a TTL; its notes are unaffected
    assert_eq!(p.vault.read_note(&p.therapist, id).await.unwrap(), NOTE);
}

#[tokio::test]
async fn create_without_key_fails() {
    let p = Practice::new().await;
    let err = p
        .vault
        .create_note(
            &p.therapist,
            p.session_id,
            NoteType::Progress,
            NOTE,
            Some("billing-notes"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::NoActiveKey { key_name, .. } if key_name == "billing-notes"));
}

#[tokio::test]
async fn provisioning_twice_is_rejected() {
    let p = Practice::new().await;
    let err = p
        .vault
        .provision_key(&p.owner, KEY, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::DuplicateActiveKey { .. }));
}

#[tokio::test]
async fn revoked_material_is_key_unavailable() {
    let p = Practice::new().await;
    let id = p.draft(NoteType::Progress, NOTE).await;
    let meta = p.vault.note_metadata(&p.owner, id).await.unwrap();

    assert!(p.vault.custodian().revoke(meta.key_id).await);
    assert!(matches!(
        p.vault.read_note(&p.owner, id).await,
        Err(VaultError::KeyUnavailable { key_id, .. }) if key_id == meta.key_id
    ));
}
