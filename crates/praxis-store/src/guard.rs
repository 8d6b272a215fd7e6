//! Tenant and role checks, evaluated before every vault operation.
//!
//! | action                                   | permitted                           |
//! |------------------------------------------|-------------------------------------|
//! | create/update/finalize/lock/delete/read  | therapist of record, Owner, Admin   |
//! | view metadata, list a session's notes    | therapist of record, Owner, Admin   |
//! | provision/rotate keys, list keys         | Owner, Admin                        |
//! | read the audit trail                     | Owner, Admin                        |
//!
//! A principal from another tenant is refused whatever its role. For a stored
//! note the tenant recorded on the note decides, and a session directory that
//! disagrees with it is refused too.

use std::fmt;

use praxis_core::{Principal, TenantId, VaultError, VaultResult};

use crate::session::SessionRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateNote,
    UpdateNote,
    FinalizeNote,
    LockNote,
    DeleteNote,
    ReadNote,
    ViewNoteMetadata,
    ManageKeys,
    ListKeys,
    ReadAudit,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateNote => "create note",
            Self::UpdateNote => "update note",
            Self::FinalizeNote => "finalize note",
            Self::LockNote => "lock note",
            Self::DeleteNote => "delete note",
            Self::ReadNote => "read note",
            Self::ViewNoteMetadata => "view note metadata",
            Self::ManageKeys => "manage keys",
            Self::ListKeys => "list keys",
            Self::ReadAudit => "read audit trail",
        }
    }

    fn is_note_action(&self) -> bool {
        !matches!(self, Self::ManageKeys | Self::ListKeys | Self::ReadAudit)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the action applies to
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// A session and the notes under it
    Session(&'a SessionRef),
    /// A stored note: its own tenant plus the session it was written for
    Note {
        tenant_id: TenantId,
        session: &'a SessionRef,
    },
    /// Tenant-wide resources: the key ring and the audit trail
    Tenant(TenantId),
}

impl Target<'_> {
    fn tenant_id(&self) -> TenantId {
        match self {
            Self::Session(s) => s.tenant_id,
            Self::Note { tenant_id, .. } => *tenant_id,
            Self::Tenant(t) => *t,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    TenantMismatch,
    NotPermitted { role: String, action: Action },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TenantMismatch => f.write_str("principal belongs to another tenant"),
            Self::NotPermitted { role, action } => write!(f, "role {role} may not {action}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn into_result(self) -> VaultResult<()> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(DenyReason::TenantMismatch) => Err(VaultError::TenantMismatch),
            Self::Deny(reason) => Err(VaultError::Unauthorized(reason.to_string())),
        }
    }
}

/// Pure policy decision; no logging.
pub fn authorize(principal: &Principal, action: Action, target: Target<'_>) -> Decision {
    if principal.tenant_id != target.tenant_id() {
        return Decision::Deny(DenyReason::TenantMismatch);
    }
    if let Target::Note { tenant_id, session } = target {
        if session.tenant_id != tenant_id {
            return Decision::Deny(DenyReason::TenantMismatch);
        }
    }

    let allowed = principal.role.is_administrative()
        || match target {
            Target::Session(session) | Target::Note { session, .. } => {
                action.is_note_action() && session.therapist_id == principal.user_id
            }
            Target::Tenant(_) => false,
        };

    if allowed {
        Decision::Allow
    } else {
        Decision::Deny(DenyReason::NotPermitted {
            role: principal.role.to_string(),
            action,
        })
    }
}

/// Authorize and turn a denial into an error, logging it as a security event.
pub fn enforce(principal: &Principal, action: Action, target: Target<'_>) -> VaultResult<()> {
    let decision = authorize(principal, action, target);
    if let Decision::Deny(reason) = &decision {
        tracing::warn!(
            target: "praxis::security",
            user_id = %principal.user_id,
            principal_tenant = %principal.tenant_id,
            target_tenant = %target.tenant_id(),
            role = %principal.role,
            %action,
            %reason,
            "access denied"
        );
    }
    decision.into_result()
}
