use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Returned when a closed enum is parsed from an identifier it does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// A firm (practice). Every key, session, and note belongs to exactly one.
    TenantId
);
uuid_id!(UserId);
uuid_id!(SessionId);
uuid_id!(CaseFileId);
uuid_id!(NoteId);
uuid_id!(
    /// Identifies one version of a key in the key ring (not the key material).
    KeyId
);

/// Membership role of a user within a firm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Owner,
    Admin,
    Therapist,
    Biller,
    Staff,
    ReadOnly,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "Owner",
            Self::Admin => "Admin",
            Self::Therapist => "Therapist",
            Self::Biller => "Biller",
            Self::Staff => "Staff",
            Self::ReadOnly => "ReadOnly",
        }
    }

    /// Owner and Admin manage keys, read audit trails, and act on any note in the firm.
    pub fn is_administrative(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "therapist" => Ok(Self::Therapist),
            "biller" => Ok(Self::Biller),
            "staff" => Ok(Self::Staff),
            "readonly" | "read-only" | "read_only" => Ok(Self::ReadOnly),
            _ => Err(ParseEnumError::new("role", s)),
        }
    }
}

/// The acting user, as supplied by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub role: Role,
    /// Client address, copied into audit entries when known
    #[serde(default)]
    pub ip_address: Option<String>,
}

impl Principal {
    pub fn new(user_id: UserId, tenant_id: TenantId, role: Role) -> Self {
        Self {
            user_id,
            tenant_id,
            role,
            ip_address: None,
        }
    }

    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }
}

/// Clinical documentation format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NoteType {
    Progress,
    Intake,
    /// Descriptive, Assessment, Plan
    #[serde(rename = "DAP")]
    Dap,
    /// Subjective, Objective, Assessment, Plan
    #[serde(rename = "SOAP")]
    Soap,
    /// Behavior, Intervention, Response, Plan
    #[serde(rename = "BIRP")]
    Birp,
    Termination,
}

impl NoteType {
    pub const ALL: [NoteType; 6] = [
        Self::Progress,
        Self::Intake,
        Self::Dap,
        Self::Soap,
        Self::Birp,
        Self::Termination,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "Progress",
            Self::Intake => "Intake",
            Self::Dap => "DAP",
            Self::Soap => "SOAP",
            Self::Birp => "BIRP",
            Self::Termination => "Termination",
        }
    }
}

impl fmt::Display for NoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoteType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseEnumError::new("note type", s))
    }
}

/// Lifecycle of a clinical note: Draft → Finalized → Locked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteStatus {
    Draft,
    Finalized,
    Locked,
}

impl NoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::Finalized => "Finalized",
            Self::Locked => "Locked",
        }
    }

    /// Only forward, single-step transitions exist.
    pub fn can_transition_to(&self, next: NoteStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Finalized) | (Self::Finalized, Self::Locked)
        )
    }
}

impl fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a key ring entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyStatus {
    Active,
    Retired,
    Expired,
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "Active",
            Self::Retired => "Retired",
            Self::Expired => "Expired",
        };
        f.write_str(s)
    }
}

/// Kind of mutation recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
    Locked,
    Archived,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Deleted => "Deleted",
            Self::Locked => "Locked",
            Self::Archived => "Archived",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_type_parse_is_closed() {
        assert_eq!("SOAP".parse::<NoteType>().unwrap(), NoteType::Soap);
        assert_eq!("progress".parse::<NoteType>().unwrap(), NoteType::Progress);

        let err = "Freeform".parse::<NoteType>().unwrap_err();
        assert_eq!(err.kind, "note type");
        assert_eq!(err.value, "Freeform");
    }

    #[test]
    fn test_note_type_serde_uses_identifiers() {
        let value = toml::Value::try_from(NoteType::Dap).unwrap();
        assert_eq!(value.as_str(), Some("DAP"));
    }

    #[test]
    fn test_status_transitions() {
        assert!(NoteStatus::Draft.can_transition_to(NoteStatus::Finalized));
        assert!(NoteStatus::Finalized.can_transition_to(NoteStatus::Locked));

        assert!(!NoteStatus::Draft.can_transition_to(NoteStatus::Locked));
        assert!(!NoteStatus::Finalized.can_transition_to(NoteStatus::Finalized));
        assert!(!NoteStatus::Locked.can_transition_to(NoteStatus::Finalized));
        assert!(!NoteStatus::Locked.can_transition_to(NoteStatus::Draft));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("read-only".parse::<Role>().unwrap(), Role::ReadOnly);
        assert!("superuser".parse::<Role>().is_err());
        assert!(Role::Owner.is_administrative());
        assert!(!Role::Therapist.is_administrative());
    }

    #[test]
    fn test_ids_roundtrip_through_strings() {
        let id = NoteId::new();
        let parsed: NoteId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
