//! praxis-keyring: key ring metadata and lifecycle
//!
//! A key ring entry names one version of a tenant's key (`key_id`, algorithm,
//! version, status, expiry). Material is never stored here; it lives with a
//! [`praxis_crypto::KeyCustodian`].
//!
//! Lifecycle: `Active` → `Retired` (superseded by rotation). `Expired` is not
//! written by any sweep; it is what an `Active` entry reports once its
//! `expires_at` has passed.

pub mod keychain;
pub mod record;
pub mod registry;

pub use keychain::KeychainCustodian;
pub use record::{KeyRecord, KeyRef};
pub use registry::{KeyRegistry, Rotation};
