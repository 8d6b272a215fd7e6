pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{VaultError, VaultResult};
pub use types::{
    AuditAction, CaseFileId, KeyId, KeyStatus, NoteId, NoteStatus, NoteType, ParseEnumError,
    Principal, Role, SessionId, TenantId, Timestamp, UserId,
};
