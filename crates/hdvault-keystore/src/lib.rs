//! hdvault Keystore
//!
//! Protects HD seeds at rest and runs derivation and signing over them.
//!
//! # Protection levels
//!
//! Each seed's entropy is sealed under a fresh AES-256-GCM key, and that key is
//! wrapped by one of three platform key pairs:
//! - `OPEN`: usable without a user gesture
//! - `LOCKSCREEN`: usable for a short window after the device is unlocked
//! - `BIOMETRIC`: every use needs its own biometric ceremony
//!
//! A locked key triggers one prompt through the [`gate`], then one retry.
//!
//! # Platform capabilities
//!
//! The vault only talks to the platform through the traits in [`platform`].
//! [`software`] and [`kv`] provide adapters for desktop use and tests.

pub mod callback;
pub mod error;
pub mod gate;
pub mod kv;
pub mod platform;
pub mod protection;
pub mod software;
pub mod store;
pub mod vault;

pub use callback::CallbackVault;
pub use error::{ErrorCategory, Result, VaultError};
pub use kv::{FileKeyValueStore, MemoryKeyValueStore};
pub use platform::{
    AuthCeremony, AuthOutcome, AuthPromptSurface, AuthRequest, DurableKeyValueStore, GateKind,
    KeyDurability, KeySpec, ProvisionError, SecureKeyProvisioner, StoreError, UserAuthentication,
};
pub use protection::{KeyProtection, ProtectionLevel};
pub use software::SoftwareKeyProvisioner;
pub use store::{SeedStore, StoredSeed};
pub use vault::{AuthPrompt, DerivedAccount, HdVault, SeedIdentity, VaultOptions};
