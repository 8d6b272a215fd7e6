use thiserror::Error;

use crate::types::{KeyId, NoteId, NoteStatus, NoteType, SessionId, TenantId, Timestamp};

pub type VaultResult<T> = Result<T, VaultError>;

/// Every failure the vault can surface to a caller.
///
/// Display strings never carry key material, plaintext, or ciphertext.
#[derive(Debug, Error)]
pub enum VaultError {
    // ── key resolution ───────────────────────────────────────────────────────
    #[error("no active key '{key_name}' for tenant {tenant_id}")]
    NoActiveKey { tenant_id: TenantId, key_name: String },

    #[error("key {key_id} expired at {expires_at}")]
    KeyExpired { key_id: KeyId, expires_at: Timestamp },

    #[error("key {key_id} unavailable: {reason}")]
    KeyUnavailable { key_id: KeyId, reason: String },

    #[error("key '{key_name}' already has an active version for tenant {tenant_id}")]
    DuplicateActiveKey { tenant_id: TenantId, key_name: String },

    // ── integrity ────────────────────────────────────────────────────────────
    #[error("authentication failed: ciphertext, nonce, aad, or key do not match")]
    AuthenticationFailed,

    #[error("content hash mismatch after decryption")]
    ContentHashMismatch,

    #[error("unknown algorithm: '{0}'")]
    UnknownAlgorithm(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    // ── state machine ────────────────────────────────────────────────────────
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: NoteStatus, to: NoteStatus },

    #[error("note {0} is locked")]
    NoteLocked(NoteId),

    #[error("session {session_id} already has a {note_type} note")]
    DuplicateNoteType {
        session_id: SessionId,
        note_type: NoteType,
    },

    #[error("concurrent modification: expected version {expected}, found {actual}")]
    ConcurrentModification { expected: u32, actual: u32 },

    #[error("re-sealing content on finalize is disabled")]
    ResealNotPermitted,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    // ── access guard ─────────────────────────────────────────────────────────
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    // ── infrastructure ───────────────────────────────────────────────────────
    #[error("audit error: {0}")]
    Audit(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("vault state changed by another writer: expected generation {expected}, found {found}")]
    StaleState { expected: u64, found: u64 },

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VaultError {
    /// Only a lost optimistic-concurrency race is worth retrying after a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification { .. } | Self::StaleState { .. }
        )
    }

    /// Access-guard denials, which are logged as security events and never retried.
    pub fn is_security_event(&self) -> bool {
        matches!(self, Self::TenantMismatch | Self::Unauthorized(_))
    }

    /// Integrity failures are fatal to the read and must reach the caller verbatim.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed | Self::ContentHashMismatch)
    }
}
