//! praxis: clinical note vault CLI
//!
//! Commands:
//!   init                         - create the master key file / passphrase salt
//!   config show                  - display current configuration
//!   key provision|rotate|list    - manage the tenant's key ring
//!   session add|list             - maintain the local session directory
//!   note create|update|finalize|lock|delete|read|show|list
//!   audit list                   - print the tenant's audit trail
//!
//! Identity comes from --tenant/--user/--role (or PRAXIS_TENANT, PRAXIS_USER,
//! PRAXIS_ROLE). Note bodies are read from --file or stdin.

mod custodian;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use praxis_core::config::{expand_home, PraxisConfig};
use praxis_core::{
    CaseFileId, NoteId, NoteType, Principal, Role, SessionId, TenantId, UserId, VaultError,
};
use praxis_crypto::Algorithm;
use praxis_store::{
    JsonFileStorage, MemorySessionDirectory, SessionDirectory, SessionRef, Vault, VaultOptions,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::custodian::CliCustodian;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "praxis",
    version,
    about = "Encrypted clinical note vault",
    long_about = "praxis: seal, finalize, lock and audit clinical notes under per-tenant rotating keys"
)]
struct Cli {
    /// Path to praxis.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "PRAXIS_CONFIG",
        default_value = "~/.config/praxis/praxis.toml",
        global = true
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [logging] level
    #[arg(long, env = "PRAXIS_LOG", global = true)]
    log: Option<String>,

    /// Log format; overrides [logging] format
    #[arg(long, env = "PRAXIS_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(flatten)]
    identity: Identity,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Identity {
    /// Tenant (practice) to act for
    #[arg(long, env = "PRAXIS_TENANT", global = true)]
    tenant: Option<TenantId>,

    /// Acting user id
    #[arg(long, env = "PRAXIS_USER", global = true)]
    user: Option<UserId>,

    /// Acting user's role within the tenant
    #[arg(long, env = "PRAXIS_ROLE", global = true, default_value = "owner")]
    role: Role,

    /// Client address recorded in audit entries
    #[arg(long, env = "PRAXIS_IP", global = true)]
    ip: Option<String>,
}

impl Identity {
    fn principal(&self) -> Result<Principal> {
        let tenant = self
            .tenant
            .context("no tenant: pass --tenant or set PRAXIS_TENANT")?;
        let user = self
            .user
            .context("no user: pass --user or set PRAXIS_USER")?;
        let principal = Principal::new(user, tenant, self.role);
        Ok(match &self.ip {
            Some(ip) => principal.with_ip_address(ip.clone()),
            None => principal,
        })
    }
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the custodian's master key file or passphrase salt
    Init {
        /// Overwrite existing key material (existing notes become unreadable)
        #[arg(long)]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Key ring management (Owner/Admin)
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Session directory management
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Clinical notes
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /// Audit trail (Owner/Admin)
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Create version 1 of a named key
    Provision {
        /// Key name (default: keys.default_key_name)
        #[arg(long)]
        name: Option<String>,
        /// AES-256-GCM or XCHACHA20-POLY1305 (default: keys.algorithm)
        #[arg(long)]
        algorithm: Option<Algorithm>,
        /// Free-form note stored on the key record
        #[arg(long)]
        notes: Option<String>,
    },

    /// Retire the Active version and activate a new one
    Rotate {
        #[arg(long)]
        name: Option<String>,
        /// Fail if the Active version is no longer this one
        #[arg(long)]
        expected_version: Option<u32>,
    },

    /// List key versions (all names, or the history of one)
    List {
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// Register a session and its therapist of record (Owner/Admin)
    Add {
        /// Therapist of record
        #[arg(long)]
        therapist: UserId,
        /// Session id (default: random)
        #[arg(long)]
        session: Option<SessionId>,
        /// Case file id (default: random, or the existing one with --replace)
        #[arg(long)]
        case_file: Option<CaseFileId>,
        /// Overwrite an existing session of this tenant (reassign the therapist)
        #[arg(long)]
        replace: bool,
    },

    /// List the tenant's sessions
    List,
}

#[derive(Subcommand, Debug)]
enum NoteAction {
    /// Seal a new Draft note
    Create {
        #[arg(long)]
        session: SessionId,
        /// Progress, Intake, DAP, SOAP, BIRP or Termination
        #[arg(long = "type")]
        note_type: NoteType,
        /// Read the note body from a file instead of stdin
        #[arg(long, short = 'f')]
        file: Option<PathBuf>,
        /// Key name (default: keys.default_key_name)
        #[arg(long)]
        key: Option<String>,
    },

    /// Replace a Draft's content
    Update {
        note: NoteId,
        /// Version the edit is based on
        #[arg(long)]
        version: u32,
        #[arg(long, short = 'f')]
        file: Option<PathBuf>,
    },

    /// Draft -> Finalized
    Finalize {
        note: NoteId,
        #[arg(long)]
        version: u32,
        /// Revised content to seal while finalizing
        #[arg(long, short = 'f')]
        file: Option<PathBuf>,
    },

    /// Finalized -> Locked (irreversible)
    Lock {
        note: NoteId,
        #[arg(long)]
        version: u32,
    },

    /// Soft-delete a Draft or Finalized note
    Delete {
        note: NoteId,
        #[arg(long)]
        version: u32,
    },

    /// Decrypt a note to stdout or a file
    Read {
        note: NoteId,
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Print a note's metadata as JSON (nothing is decrypted)
    Show { note: NoteId },

    /// List the live notes of a session
    List {
        #[arg(long)]
        session: SessionId,
    },
}

#[derive(Subcommand, Debug)]
enum AuditAction {
    /// Print audit entries, oldest first
    List {
        /// Only entries for this note or key id
        #[arg(long)]
        entity: Option<Uuid>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PraxisConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.logging.format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    init_logging(level, &format);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "praxis starting"
    );

    match cli.command {
        Commands::Init { force } => cmd_init(&config, force),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
        Commands::Session { action } => cmd_session(&config, &cli.identity, action),
        Commands::Key { action } => {
            let principal = cli.identity.principal()?;
            let vault = open_vault(&config)?;
            cmd_key(&vault, &principal, action).await
        }
        Commands::Note { action } => {
            let principal = cli.identity.principal()?;
            let vault = open_vault(&config)?;
            cmd_note(&vault, &principal, action).await
        }
        Commands::Audit { action: AuditAction::List { entity } } => {
            let principal = cli.identity.principal()?;
            let vault = open_vault(&config)?;
            cmd_audit_list(&vault, &principal, entity).await
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output (including decrypted notes); logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn session_directory_path(config: &PraxisConfig) -> PathBuf {
    expand_home(&config.sessions.directory_file)
}

fn open_vault(config: &PraxisConfig) -> Result<Vault<CliCustodian>> {
    let custodian = custodian::from_config(&config.custodian)?;
    let sessions = MemorySessionDirectory::load(&session_directory_path(config))
        .context("loading session directory")?;
    let options = VaultOptions::from_config(config)?;
    let store_path = expand_home(&config.vault.store_path);

    let vault = Vault::builder(custodian)
        .storage(JsonFileStorage::new(&store_path))
        .sessions(Arc::new(sessions))
        .options(options)
        .open()
        .with_context(|| format!("opening vault: {}", store_path.display()))?;
    Ok(vault)
}

// ── `praxis init` ─────────────────────────────────────────────────────────────

fn cmd_init(config: &PraxisConfig, force: bool) -> Result<()> {
    let done = custodian::init(&config.custodian, force)?;
    println!("{done}");
    Ok(())
}

// ── `praxis config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &PraxisConfig, config_path: &Path) -> Result<()> {
    let resolved = expand_home(config_path);
    if resolved.exists() {
        println!("# Configuration from: {}", resolved.display());
    } else {
        println!("# Configuration: defaults (no file at {})", resolved.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `praxis key` ──────────────────────────────────────────────────────────────

async fn cmd_key(
    vault: &Vault<CliCustodian>,
    principal: &Principal,
    action: KeyAction,
) -> Result<()> {
    let default_name = vault.options().default_key_name.clone();
    match action {
        KeyAction::Provision {
            name,
            algorithm,
            notes,
        } => {
            let name = name.unwrap_or(default_name);
            let record = vault
                .provision_key(principal, &name, algorithm, notes)
                .await?;
            println!(
                "Provisioned {} v{} ({}) → {}",
                record.name, record.key_version, record.algorithm, record.key_id
            );
        }
        KeyAction::Rotate {
            name,
            expected_version,
        } => {
            let name = name.unwrap_or(default_name);
            let rotation = vault.rotate_key(principal, &name, expected_version).await?;
            println!(
                "Rotated {}: v{} retired, v{} active → {}",
                name,
                rotation.retired.key_version,
                rotation.activated.key_version,
                rotation.activated.key_id
            );
        }
        KeyAction::List { name } => {
            let records = match name {
                Some(name) => vault.key_history(principal, &name).await?,
                None => vault.list_keys(principal).await?,
            };
            if records.is_empty() {
                println!("No keys provisioned.");
            }
            for record in records {
                let expires = record
                    .expires_at
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "never".into());
                println!(
                    "{:<20} v{:<3} {:<9} {:<19} expires: {:<10} {}",
                    record.name,
                    record.key_version,
                    record.status.to_string(),
                    record.algorithm.identifier(),
                    expires,
                    record.key_id
                );
            }
        }
    }
    Ok(())
}

// ── `praxis session` ──────────────────────────────────────────────────────────

/// Register or reassign a session for the principal's own tenant.
fn register_session(
    directory: &MemorySessionDirectory,
    principal: &Principal,
    therapist: UserId,
    session_id: SessionId,
    case_file: Option<CaseFileId>,
    replace: bool,
) -> Result<SessionId> {
    if !principal.role.is_administrative() {
        anyhow::bail!("role {} may not register sessions", principal.role);
    }
    let existing = directory
        .lookup(session_id)
        .filter(|s| s.tenant_id == principal.tenant_id);
    let session = SessionRef {
        session_id,
        tenant_id: principal.tenant_id,
        case_file_id: case_file
            .or(existing.map(|s| s.case_file_id))
            .unwrap_or_default(),
        therapist_id: therapist,
    };
    directory.register(session, replace).map_err(|e| match e {
        VaultError::AlreadyExists(_) => anyhow::anyhow!(
            "session {session_id} is already registered; pass --replace to reassign it"
        ),
        VaultError::TenantMismatch => {
            anyhow::anyhow!("session {session_id} belongs to another tenant")
        }
        other => other.into(),
    })?;
    Ok(session_id)
}

fn cmd_session(config: &PraxisConfig, identity: &Identity, action: SessionAction) -> Result<()> {
    let principal = identity.principal()?;
    let path = session_directory_path(config);
    let directory = MemorySessionDirectory::load(&path).context("loading session directory")?;

    match action {
        SessionAction::Add {
            therapist,
            session,
            case_file,
            replace,
        } => {
            let session_id = register_session(
                &directory,
                &principal,
                therapist,
                session.unwrap_or_default(),
                case_file,
                replace,
            )?;
            directory
                .save(&path)
                .with_context(|| format!("saving session directory: {}", path.display()))?;
            println!("Registered session {session_id} (therapist {therapist})");
        }
        SessionAction::List => {
            let sessions = directory.for_tenant(principal.tenant_id);
            if sessions.is_empty() {
                println!("No sessions registered.");
            }
            for s in sessions {
                println!(
                    "{}  case file {}  therapist {}",
                    s.session_id, s.case_file_id, s.therapist_id
                );
            }
        }
    }
    Ok(())
}

// ── `praxis note` ─────────────────────────────────────────────────────────────

async fn read_body(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("reading note body: {}", path.display())),
        None => {
            let mut body = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut body)
                .await
                .context("reading note body from stdin")?;
            Ok(body)
        }
    }
}

async fn cmd_note(
    vault: &Vault<CliCustodian>,
    principal: &Principal,
    action: NoteAction,
) -> Result<()> {
    match action {
        NoteAction::Create {
            session,
            note_type,
            file,
            key,
        } => {
            let body = read_body(file.as_deref()).await?;
            let note_id = vault
                .create_note(principal, session, note_type, &body, key.as_deref())
                .await?;
            println!("{note_id}");
        }
        NoteAction::Update {
            note,
            version,
            file,
        } => {
            let body = read_body(file.as_deref()).await?;
            let version = vault.update_note(principal, note, version, &body).await?;
            println!("{note} updated (version {version})");
        }
        NoteAction::Finalize {
            note,
            version,
            file,
        } => {
            let revised = match file {
                Some(path) => Some(read_body(Some(&path)).await?),
                None => None,
            };
            let version = vault
                .finalize_note(principal, note, version, revised.as_deref())
                .await?;
            println!("{note} finalized (version {version})");
        }
        NoteAction::Lock { note, version } => {
            let version = vault.lock_note(principal, note, version).await?;
            println!("{note} locked (version {version})");
        }
        NoteAction::Delete { note, version } => {
            vault.delete_note(principal, note, version).await?;
            println!("{note} deleted");
        }
        NoteAction::Read { note, output } => {
            let plaintext = vault.read_note(principal, note).await?;
            match output {
                Some(path) => tokio::fs::write(&path, &plaintext)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&plaintext).await?;
                    stdout.flush().await?;
                }
            }
        }
        NoteAction::Show { note } => {
            let metadata = vault.note_metadata(principal, note).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        NoteAction::List { session } => {
            let notes = vault.notes_for_session(principal, session).await?;
            if notes.is_empty() {
                println!("No notes for session {session}.");
            }
            for n in notes {
                println!(
                    "{}  {:<11} {:<9} v{:<3} words: {}",
                    n.note_id,
                    n.note_type.as_str(),
                    n.status.as_str(),
                    n.version,
                    n.word_count
                        .map(|w| w.to_string())
                        .unwrap_or_else(|| "-".into())
                );
            }
        }
    }
    Ok(())
}

// ── `praxis audit list` ───────────────────────────────────────────────────────

async fn cmd_audit_list(
    vault: &Vault<CliCustodian>,
    principal: &Principal,
    entity: Option<Uuid>,
) -> Result<()> {
    let entries = vault.audit_trail(principal, entity).await?;
    if entries.is_empty() {
        println!("No audit entries.");
    }
    for e in entries {
        println!(
            "{}  {:<12} {:<8} {}  by {}  {}",
            e.timestamp,
            e.entity_type.to_string(),
            e.action.to_string(),
            e.entity_id,
            e.user_id
                .map(|u| u.to_string())
                .unwrap_or_else(|| "-".into()),
            e.changes_json.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
