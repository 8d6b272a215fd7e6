//! Key custody selected by `[custodian] kind` in praxis.toml.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use praxis_core::config::{expand_home, CustodianConfig, CustodianKind};
use praxis_core::KeyId;
use praxis_crypto::{
    derive_master_key, generate_master_key, generate_salt, Algorithm, CryptoError,
    DerivedCustodian, KdfParams, KeyCustodian, KeyMaterial, MasterKey, SALT_SIZE,
};
use praxis_keyring::KeychainCustodian;
use secrecy::SecretString;
use zeroize::Zeroize;

/// Custodian chosen at startup from configuration.
#[derive(Debug, Clone)]
pub enum CliCustodian {
    /// HKDF from a master key (key file or passphrase)
    Derived(DerivedCustodian),
    Keychain(KeychainCustodian),
}

impl KeyCustodian for CliCustodian {
    async fn fetch_key_material(&self, key_id: KeyId) -> Result<KeyMaterial, CryptoError> {
        match self {
            Self::Derived(c) => c.fetch_key_material(key_id).await,
            Self::Keychain(c) => c.fetch_key_material(key_id).await,
        }
    }

    async fn provision(&self, key_id: KeyId, algorithm: Algorithm) -> Result<(), CryptoError> {
        match self {
            Self::Derived(c) => c.provision(key_id, algorithm).await,
            Self::Keychain(c) => c.provision(key_id, algorithm).await,
        }
    }

    async fn discard(&self, key_id: KeyId) -> Result<(), CryptoError> {
        match self {
            Self::Derived(c) => c.discard(key_id).await,
            Self::Keychain(c) => c.discard(key_id).await,
        }
    }
}

pub fn from_config(config: &CustodianConfig) -> Result<CliCustodian> {
    build(config, read_passphrase)
}

fn build(
    config: &CustodianConfig,
    passphrase: impl FnOnce() -> Result<SecretString>,
) -> Result<CliCustodian> {
    match config.kind {
        CustodianKind::MasterKeyFile => {
            let master = read_master_key(&expand_home(&config.master_key_file))?;
            Ok(CliCustodian::Derived(DerivedCustodian::new(master)))
        }
        CustodianKind::Passphrase => {
            let salt = read_salt(&expand_home(&config.salt_file))?;
            let master = derive_master_key(&passphrase()?, &salt, &kdf_params(config))
                .context("deriving master key from passphrase")?;
            Ok(CliCustodian::Derived(DerivedCustodian::new(master)))
        }
        CustodianKind::Keychain => {
            let custodian = KeychainCustodian::new(config.keychain_service.clone());
            if !custodian.is_available() {
                anyhow::bail!(
                    "platform keychain is not available; set [custodian] kind to \
                     \"master_key_file\" or \"passphrase\""
                );
            }
            Ok(CliCustodian::Keychain(custodian))
        }
    }
}

fn kdf_params(config: &CustodianConfig) -> KdfParams {
    KdfParams {
        mem_cost_kib: config.argon2_mem_cost_kib,
        time_cost: config.argon2_time_cost,
        parallelism: config.argon2_parallelism,
    }
}

/// PRAXIS_PASSPHRASE, or an interactive prompt.
fn read_passphrase() -> Result<SecretString> {
    if let Ok(value) = std::env::var("PRAXIS_PASSPHRASE") {
        return Ok(SecretString::from(value));
    }
    let value = rpassword::prompt_password("praxis passphrase: ")
        .context("reading passphrase from terminal")?;
    Ok(SecretString::from(value))
}

fn read_master_key(path: &Path) -> Result<MasterKey> {
    let mut bytes = std::fs::read(path).with_context(|| {
        format!(
            "reading master key file {} (run `praxis init` first)",
            path.display()
        )
    })?;
    let master = MasterKey::from_slice(&bytes)
        .with_context(|| format!("master key file {}", path.display()));
    bytes.zeroize();
    master
}

fn read_salt(path: &Path) -> Result<[u8; SALT_SIZE]> {
    let bytes = std::fs::read(path).with_context(|| {
        format!("reading salt file {} (run `praxis init` first)", path.display())
    })?;
    <[u8; SALT_SIZE]>::try_from(bytes.as_slice()).with_context(|| {
        format!(
            "salt file {} must be {SALT_SIZE} bytes, found {}",
            path.display(),
            bytes.len()
        )
    })
}

/// Create whatever the configured custodian needs before first use.
/// Returns a one-line description of what was done.
pub fn init(config: &CustodianConfig, force: bool) -> Result<String> {
    match config.kind {
        CustodianKind::MasterKeyFile => {
            let path = expand_home(&config.master_key_file);
            let master = generate_master_key();
            write_secret_file(&path, master.as_bytes(), force)?;
            Ok(format!("wrote master key: {}", path.display()))
        }
        CustodianKind::Passphrase => {
            let path = expand_home(&config.salt_file);
            write_secret_file(&path, &generate_salt(), force)?;
            Ok(format!("wrote passphrase salt: {}", path.display()))
        }
        CustodianKind::Keychain => {
            let custodian = KeychainCustodian::new(config.keychain_service.clone());
            if !custodian.is_available() {
                anyhow::bail!("platform keychain is not available");
            }
            Ok(format!(
                "platform keychain ready (service: {})",
                custodian.service()
            ))
        }
    }
}

fn write_secret_file(path: &Path, bytes: &[u8], force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite (notes sealed under the old key become unreadable)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
