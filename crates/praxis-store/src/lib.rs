//! praxis-store: the clinical note vault
//!
//! Save path for a note:
//! ```text
//! guard authorizes → key ring resolves the tenant's Active key → custodian
//! releases material → envelope seal → state machine + version check →
//! audit entry → storage commit
//! ```
//!
//! Every mutation runs on a working copy of [`VaultState`] under a single
//! async mutex and is committed through [`Storage`] in one step, so either all
//! of its effects land (note, key ring, audit entry) or none do.

pub mod audit;
pub mod guard;
pub mod note;
pub mod session;
pub mod storage;
pub mod vault;

pub use audit::{AuditEmitter, AuditEntry, AuditSink, EntityType, MemoryAuditSink, TracingAuditSink};
pub use guard::{authorize, enforce, Action, Decision, DenyReason, Target};
pub use note::{note_aad, word_count, ClinicalNote, NoteMetadata, NOTE_AAD_DOMAIN};
pub use session::{MemorySessionDirectory, SessionDirectory, SessionRef};
pub use storage::{JsonFileStorage, MemoryStorage, Storage, VaultState};
pub use vault::{Vault, VaultBuilder, VaultOptions};
