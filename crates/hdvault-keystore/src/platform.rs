//! Capabilities the vault consumes from its environment
//!
//! Three narrow interfaces, implemented by platform adapters:
//!
//! - [`SecureKeyProvisioner`]: the (possibly hardware-backed) key store that
//!   owns the wrapping key pairs
//! - [`AuthPromptSurface`]: renders the lock-screen or biometric prompt
//! - [`DurableKeyValueStore`]: persisted string-keyed storage
//!
//! [`crate::software`] and [`crate::kv`] provide reference implementations.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("No key pair provisioned for alias {0}")]
    NotProvisioned(String),
    #[error("Key {0} is locked until the user authenticates")]
    AuthRequired(String),
    #[error("Device authentication is not configured: {0}")]
    AuthNotConfigured(String),
    #[error("Key operation failed: {0}")]
    Crypto(String),
}

/// Where the platform should try to keep a new key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyDurability {
    /// Secure hardware when available, software otherwise
    #[default]
    PreferHardware,
    /// Software-only key material
    Software,
}

/// User gesture a private key demands before it can unwrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAuthentication {
    None,
    /// Usable for `Duration` after any successful device authentication
    TimeBoxed(Duration),
    /// Every use needs its own [`AuthCeremony`]
    PerUse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    pub authentication: UserAuthentication,
    pub durability: KeyDurability,
}

impl KeySpec {
    pub fn requires_auth(&self) -> bool {
        self.authentication != UserAuthentication::None
    }
}

/// Single-use authorization object for a per-use key.
///
/// Not `Clone`: [`SecureKeyProvisioner::unwrap_cipher`] takes it by value, so a
/// ceremony can authorize at most one unwrap.
#[derive(Debug, PartialEq, Eq)]
pub struct AuthCeremony {
    id: u64,
    alias: String,
}

impl AuthCeremony {
    pub fn new(id: u64, alias: impl Into<String>) -> Self {
        Self {
            id,
            alias: alias.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }
}

/// Public-key half of a wrapping key pair.
pub trait WrapCipher: Send {
    fn wrap(&self, key: &[u8]) -> Result<Vec<u8>, ProvisionError>;
}

/// Private-key half of a wrapping key pair.
pub trait UnwrapCipher: Send {
    /// May fail with [`ProvisionError::AuthRequired`] if the key locked itself
    /// between initialization and use.
    fn unwrap(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, ProvisionError>;
}

pub trait SecureKeyProvisioner: Send + Sync {
    /// Create the key pair for `alias` unless it already exists.
    fn ensure_key_pair(&self, alias: &str, spec: &KeySpec) -> Result<(), ProvisionError>;

    fn wrap_cipher(&self, alias: &str) -> Result<Box<dyn WrapCipher>, ProvisionError>;

    /// Initialize the private-key cipher.
    ///
    /// Returns [`ProvisionError::AuthRequired`] while the key is locked. Per-use
    /// keys need an authorized `ceremony`, which is consumed either way.
    fn unwrap_cipher(
        &self,
        alias: &str,
        ceremony: Option<AuthCeremony>,
    ) -> Result<Box<dyn UnwrapCipher>, ProvisionError>;

    /// Start a ceremony the prompt surface can authorize for one unwrap.
    fn begin_ceremony(&self, alias: &str) -> Result<AuthCeremony, ProvisionError>;

    /// Spend a ceremony that will never reach [`Self::unwrap_cipher`].
    fn end_ceremony(&self, ceremony: AuthCeremony);
}

/// Which system prompt to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateKind {
    LockScreen,
    Biometric,
}

/// A prompt to present to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub alias: String,
    pub kind: GateKind,
    /// User-facing text, the purpose of the operation
    pub prompt: String,
    /// Ceremony to authorize, for biometric prompts
    pub ceremony: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Unlocked,
    Canceled,
    Failed(String),
}

#[async_trait]
pub trait AuthPromptSurface: Send + Sync {
    /// Show the prompt and resolve once the user finishes with it.
    async fn present(&self, request: AuthRequest) -> AuthOutcome;
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encoding error: {0}")]
    Encoding(String),
    /// Entries of one record disagree and need manual repair
    #[error("Inconsistent entries: {0}")]
    Inconsistent(String),
}

/// String-keyed durable storage with no multi-key transactions.
pub trait DurableKeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn list_keys(&self) -> Result<Vec<String>, StoreError>;
}
