//! Vault error taxonomy
//!
//! Every operation resolves to exactly one `VaultError` on failure.
//! [`VaultError::category`] groups the variants the way callers message them.

use hdvault_core::{CryptoError, EnvelopeError, KeyError, SeedError, SignError};
use thiserror::Error;

use crate::platform::{ProvisionError, StoreError};

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid derivation path: {0}")]
    InvalidPath(String),

    #[error("Seed not found: {0}")]
    SeedNotFound(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Protection key not provisioned: {0}")]
    KeyNotProvisioned(String),

    #[error("Authentication setup required: {0}")]
    AuthSetup(String),

    #[error("Authentication canceled")]
    AuthCanceled,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Authentication already pending for {0}")]
    GateBusy(String),

    #[error("Cryptographic failure: {0}")]
    Crypto(String),
}

/// Coarse grouping of [`VaultError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input; fix the request
    Validation,
    /// Missing or unreadable stored data
    Storage,
    /// Device authentication must be configured first
    AuthSetup,
    AuthCanceled,
    AuthFailed,
    /// Another prompt for the same key is on screen
    Busy,
    /// Unexpected cipher failure
    Crypto,
}

impl VaultError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidMnemonic(_) | Self::InvalidPath(_) => ErrorCategory::Validation,
            Self::SeedNotFound(_) | Self::MalformedPayload(_) | Self::Storage(_) => {
                ErrorCategory::Storage
            }
            Self::AuthSetup(_) => ErrorCategory::AuthSetup,
            Self::AuthCanceled => ErrorCategory::AuthCanceled,
            Self::AuthFailed(_) => ErrorCategory::AuthFailed,
            Self::GateBusy(_) => ErrorCategory::Busy,
            Self::KeyNotProvisioned(_) | Self::Crypto(_) => ErrorCategory::Crypto,
        }
    }
}

impl From<SeedError> for VaultError {
    fn from(e: SeedError) -> Self {
        match e {
            SeedError::InvalidMnemonic(msg) => Self::InvalidMnemonic(msg),
            SeedError::InvalidEntropy(msg) => Self::Crypto(msg),
        }
    }
}

impl From<KeyError> for VaultError {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::InvalidPath(msg) => Self::InvalidPath(msg),
            KeyError::DerivationFailed(msg) => Self::Crypto(msg),
            KeyError::Seed(e) => e.into(),
        }
    }
}

impl From<EnvelopeError> for VaultError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::Malformed(msg) => Self::MalformedPayload(msg),
        }
    }
}

impl From<CryptoError> for VaultError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e.to_string())
    }
}

impl From<SignError> for VaultError {
    fn from(e: SignError) -> Self {
        Self::Crypto(e.to_string())
    }
}

impl From<ProvisionError> for VaultError {
    fn from(e: ProvisionError) -> Self {
        match e {
            ProvisionError::NotProvisioned(alias) => Self::KeyNotProvisioned(alias),
            ProvisionError::AuthRequired(alias) => {
                Self::AuthFailed(format!("key {} is still locked", alias))
            }
            ProvisionError::AuthNotConfigured(msg) => Self::AuthSetup(msg),
            ProvisionError::Crypto(msg) => Self::Crypto(msg),
        }
    }
}
