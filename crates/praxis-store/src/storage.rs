//! Vault persistence.
//!
//! Two backends are available:
//!   - **Memory**: keeps the last committed snapshot; nothing survives the process.
//!   - **JSON file**: whole-state snapshot, committed atomically via temp+rename
//!     under an exclusive lock on a sibling `.lock` file.
//!
//! A commit replaces the entire state, so one mutation's note, key ring and
//! audit changes land together or not at all. Every committed state carries a
//! generation number, and a commit only succeeds on top of the generation it
//! was derived from. Two writers sharing one store can therefore never
//! overwrite each other's work; the loser gets `StaleState` and must reload.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use fs2::FileExt;
use praxis_core::{NoteId, VaultError, VaultResult};
use praxis_keyring::KeyRegistry;
use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;
use crate::note::ClinicalNote;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultState {
    /// Number of commits that produced this state; 0 for an empty store
    pub generation: u64,
    pub keys: KeyRegistry,
    pub notes: BTreeMap<NoteId, ClinicalNote>,
    /// Append-only; entries are never updated or removed
    pub audit: Vec<AuditEntry>,
}

impl VaultState {
    /// The generation a commit of this state must find in storage.
    pub fn parent_generation(&self) -> u64 {
        self.generation.saturating_sub(1)
    }
}

pub trait Storage: Send + Sync {
    /// The last committed state, or an empty one.
    fn load(&self) -> VaultResult<VaultState>;

    /// The stored state if it is not at `generation`.
    fn load_if_changed(&self, generation: u64) -> VaultResult<Option<VaultState>> {
        let stored = self.load()?;
        Ok((stored.generation != generation).then_some(stored))
    }

    /// Durably replace the stored state with its direct successor.
    ///
    /// Fails with `StaleState` unless the stored generation is
    /// `state.parent_generation()`.
    fn commit(&self, state: &VaultState) -> VaultResult<()>;
}

fn check_parent(stored: u64, state: &VaultState) -> VaultResult<()> {
    let expected = state.parent_generation();
    if stored != expected || state.generation == 0 {
        return Err(VaultError::StaleState {
            expected,
            found: stored,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    snapshot: Mutex<VaultState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn load(&self) -> VaultResult<VaultState> {
        Ok(self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn load_if_changed(&self, generation: u64) -> VaultResult<Option<VaultState>> {
        let snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok((snapshot.generation != generation).then(|| snapshot.clone()))
    }

    fn commit(&self, state: &VaultState) -> VaultResult<()> {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        check_parent(snapshot.generation, state)?;
        *snapshot = state.clone();
        Ok(())
    }
}

/// Only the generation of a stored state; the rest of the document is skipped.
#[derive(Deserialize)]
struct StoredGeneration {
    #[serde(default)]
    generation: u64,
}

#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `vault.json` is guarded by `vault.json.lock` next to it.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Exclusive across processes until the returned file is dropped.
    fn lock_exclusive(&self) -> VaultResult<File> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| {
                VaultError::Storage(format!("opening lock {}: {e}", lock_path.display()))
            })?;
        FileExt::lock_exclusive(&lock_file).map_err(|e| {
            VaultError::Storage(format!("locking {}: {e}", lock_path.display()))
        })?;
        Ok(lock_file)
    }

    fn read(&self) -> VaultResult<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VaultError::Storage(format!(
                "reading {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn parse_error(&self, e: serde_json::Error) -> VaultError {
        VaultError::Storage(format!("parsing {}: {e}", self.path.display()))
    }
}

impl Storage for JsonFileStorage {
    fn load(&self) -> VaultResult<VaultState> {
        match self.read()? {
            Some(content) => serde_json::from_str(&content).map_err(|e| self.parse_error(e)),
            None => Ok(VaultState::default()),
        }
    }

    fn load_if_changed(&self, generation: u64) -> VaultResult<Option<VaultState>> {
        let Some(content) = self.read()? else {
            return Ok((generation != 0).then(VaultState::default));
        };
        let stored: StoredGeneration =
            serde_json::from_str(&content).map_err(|e| self.parse_error(e))?;
        if stored.generation == generation {
            return Ok(None);
        }
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| self.parse_error(e))
    }

    fn commit(&self, state: &VaultState) -> VaultResult<()> {
        let _lock = self.lock_exclusive()?;

        let stored = match self.read()? {
            Some(content) => {
                serde_json::from_str::<StoredGeneration>(&content)
                    .map_err(|e| self.parse_error(e))?
                    .generation
            }
            None => 0,
        };
        check_parent(stored, state).inspect_err(|_| {
            tracing::warn!(
                path = %self.path.display(),
                stored,
                attempted = state.generation,
                "vault state changed by another writer; commit refused"
            );
        })?;

        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| VaultError::Storage(format!("serializing vault state: {e}")))?;
        write_atomic(&self.path, &json)?;

        tracing::debug!(
            path = %self.path.display(),
            generation = state.generation,
            notes = state.notes.len(),
            audit_entries = state.audit.len(),
            "vault state committed"
        );
        Ok(())
    }
}

/// Write `bytes` to a temp file beside `path`, fsync it, rename it over
/// `path`, then fsync the directory so the rename itself is durable.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> VaultResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
        VaultError::Storage(format!("creating temp file in {}: {e}", parent.display()))
    })?;
    temp.write_all(bytes)
        .map_err(|e| VaultError::Storage(format!("writing temp file for {}: {e}", path.display())))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| VaultError::Storage(format!("syncing temp file for {}: {e}", path.display())))?;
    temp.persist(path)
        .map_err(|e| VaultError::Storage(format!("persisting {}: {}", path.display(), e.error)))?;
    sync_dir(parent)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> VaultResult<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| VaultError::Storage(format!("syncing directory {}: {e}", dir.display())))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> VaultResult<()> {
    Ok(())
}
