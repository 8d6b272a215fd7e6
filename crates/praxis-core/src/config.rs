use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// Top-level configuration (loaded from praxis.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PraxisConfig {
    pub vault: VaultConfig,
    pub keys: KeysConfig,
    pub custodian: CustodianConfig,
    pub sessions: SessionsConfig,
    pub logging: LoggingConfig,
}

/// Which notes of a session compete for uniqueness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteUniqueness {
    /// At most one live note per (session, note type)
    #[default]
    SessionAndType,
    /// At most one live note per session
    Session,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// JSON store file (default: ~/.local/share/praxis/vault.json)
    pub store_path: PathBuf,
    pub note_uniqueness: NoteUniqueness,
    /// Accept revised content when finalizing a draft (default: true)
    pub allow_reseal_on_finalize: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Key ring name used when a command does not name one
    pub default_key_name: String,
    /// Algorithm identifier for newly provisioned keys
    pub algorithm: String,
    /// Expiry applied to new key versions; None = never expires
    pub default_ttl_days: Option<u32>,
    /// Upper bound on a single key custodian call
    pub custodian_timeout_ms: u64,
}

/// Where key material comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustodianKind {
    /// Raw 32-byte master key on disk, per-key material derived with HKDF
    #[default]
    MasterKeyFile,
    /// Master key derived from a passphrase with Argon2id
    Passphrase,
    /// Random per-key material held in the OS keychain
    Keychain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodianConfig {
    pub kind: CustodianKind,
    /// Path to the raw master key file
    pub master_key_file: PathBuf,
    /// Salt for passphrase derivation
    pub salt_file: PathBuf,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
    /// Keychain service name entries are stored under
    pub keychain_service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// JSON file listing session references (id, tenant, case file, therapist)
    pub directory_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("~/.local/share/praxis/vault.json"),
            note_uniqueness: NoteUniqueness::default(),
            allow_reseal_on_finalize: true,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            default_key_name: "clinical-notes".into(),
            algorithm: "AES-256-GCM".into(),
            default_ttl_days: None,
            custodian_timeout_ms: 5000,
        }
    }
}

impl Default for CustodianConfig {
    fn default() -> Self {
        Self {
            kind: CustodianKind::default(),
            master_key_file: PathBuf::from("~/.config/praxis/master.key"),
            salt_file: PathBuf::from("~/.config/praxis/master.salt"),
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
            keychain_service: "praxis".into(),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            directory_file: PathBuf::from("~/.local/share/praxis/sessions.json"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl PraxisConfig {
    /// Parse a config file. A missing file yields defaults; a malformed one is an error.
    pub fn load_or_default(path: &Path) -> VaultResult<Self> {
        let path = expand_home(path);
        if !path.exists() {
            tracing::warn!("config file not found: {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        toml::from_str(&contents)
            .map_err(|e| VaultError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Default TTL in seconds, if configured
    pub fn default_ttl_secs(&self) -> Option<u64> {
        self.keys
            .default_ttl_days
            .map(|days| u64::from(days) * 86_400)
    }
}

/// Expand a leading `~/` against $HOME. Other paths pass through.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
