use praxis_core::{KeyId, NoteId, NoteStatus, NoteType, SessionId, TenantId, Timestamp, UserId};
use praxis_crypto::{b64, Algorithm, Envelope};
use serde::{Deserialize, Serialize};

/// Domain prefix of every note's associated data
pub const NOTE_AAD_DOMAIN: &[u8] = b"praxis-note/v1";

/// Associated data binding a note's ciphertext to its identity:
/// `"praxis-note/v1" || session_id (16) || note_id (16) || note_type identifier`.
///
/// Rebuilt from the note's own fields on every read, so an envelope copied
/// onto a different note does not authenticate.
pub fn note_aad(session_id: SessionId, note_id: NoteId, note_type: NoteType) -> Vec<u8> {
    let note_type = note_type.as_str().as_bytes();
    let mut aad = Vec::with_capacity(NOTE_AAD_DOMAIN.len() + 32 + note_type.len());
    aad.extend_from_slice(NOTE_AAD_DOMAIN);
    aad.extend_from_slice(session_id.as_bytes());
    aad.extend_from_slice(note_id.as_bytes());
    aad.extend_from_slice(note_type);
    aad
}

/// Whitespace-separated words, or None when the plaintext is not UTF-8.
pub fn word_count(plaintext: &[u8]) -> Option<u32> {
    std::str::from_utf8(plaintext)
        .ok()
        .map(|text| text.split_whitespace().count() as u32)
}

/// A persisted clinical note. The plaintext only ever exists inside `envelope`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalNote {
    pub note_id: NoteId,
    /// Copied from the owning session at creation
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    /// The key version active when the note was created; never re-resolved
    pub key_id: KeyId,
    pub note_type: NoteType,
    pub envelope: Envelope,
    pub status: NoteStatus,
    #[serde(default)]
    pub finalized_at: Option<Timestamp>,
    #[serde(default)]
    pub finalized_by: Option<UserId>,
    #[serde(default)]
    pub locked_at: Option<Timestamp>,
    #[serde(default)]
    pub locked_by: Option<UserId>,
    #[serde(default)]
    pub word_count: Option<u32>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Starts at 1, incremented by every mutation
    pub version: u32,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl ClinicalNote {
    /// Associated data this note's envelope must authenticate against.
    pub fn expected_aad(&self) -> Vec<u8> {
        note_aad(self.session_id, self.note_id, self.note_type)
    }

    /// The stored envelope with its AAD replaced by the one derived from this note.
    pub fn envelope_for_open(&self) -> Envelope {
        Envelope {
            aad: self.expected_aad(),
            ..self.envelope.clone()
        }
    }

    pub fn is_live(&self) -> bool {
        !self.is_deleted
    }

    pub fn metadata(&self) -> NoteMetadata {
        NoteMetadata {
            note_id: self.note_id,
            session_id: self.session_id,
            key_id: self.key_id,
            note_type: self.note_type,
            status: self.status,
            algorithm: self.envelope.algorithm,
            content_hash: self.envelope.content_hash.as_deref().map(b64::encode),
            word_count: self.word_count,
            finalized_at: self.finalized_at,
            finalized_by: self.finalized_by,
            locked_at: self.locked_at,
            locked_by: self.locked_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        }
    }
}

/// Everything about a note except its ciphertext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteMetadata {
    pub note_id: NoteId,
    pub session_id: SessionId,
    pub key_id: KeyId,
    pub note_type: NoteType,
    pub status: NoteStatus,
    pub algorithm: Algorithm,
    /// base64 BLAKE3 of the plaintext
    pub content_hash: Option<String>,
    pub word_count: Option<u32>,
    pub finalized_at: Option<Timestamp>,
    pub finalized_by: Option<UserId>,
    pub locked_at: Option<Timestamp>,
    pub locked_by: Option<UserId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub version: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aad_layout() {
        let session_id = SessionId::new();
        let note_id = NoteId::new();
        let aad = note_aad(session_id, note_id, NoteType::Soap);

        assert!(aad.starts_with(NOTE_AAD_DOMAIN));
        let rest = &aad[NOTE_AAD_DOMAIN.len()..];
        assert_eq!(&rest[..16], session_id.as_bytes());
        assert_eq!(&rest[16..32], note_id.as_bytes());
        assert_eq!(&rest[32..], b"SOAP");
    }

    #[test]
    fn test_aad_differs_per_note() {
        let session_id = SessionId::new();
        let a = note_aad(session_id, NoteId::new(), NoteType::Progress);
        let b = note_aad(session_id, NoteId::new(), NoteType::Progress);
        assert_ne!(a, b);
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count(b"Client reports improved mood."), Some(4));
        assert_eq!(word_count(b"  spaced\n\tout  "), Some(2));
        assert_eq!(word_count(b""), Some(0));
        assert_eq!(word_count(&[0xFF, 0xFE]), None);
    }
}
