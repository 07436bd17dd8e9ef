//! The vault facade
//!
//! [`HdVault`] ties the seed store, the three protection variants and the
//! derivation pipeline together. Every read operation follows the same chain:
//! load the seed, decrypt its entropy under its level (prompting once if the
//! key is locked), run one terminal step on the entropy, wipe it.

use std::sync::Arc;
use std::time::Duration;

use bitcoin::bip32::DerivationPath;
use hdvault_core::{
    derive_from_entropy, entropy_to_mnemonic, generate_entropy, mnemonic_phrase,
    mnemonic_to_entropy, parse_mnemonic, parse_path, seed, sign, SignatureData, SigningScheme,
    ROOT_DERIVATION_PATH,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use crate::error::{ErrorCategory, Result};
use crate::gate::GateCoordinator;
use crate::platform::{AuthPromptSurface, DurableKeyValueStore, KeyDurability, SecureKeyProvisioner};
use crate::protection::{KeyProtection, ProtectionLevel};
use crate::store::SeedStore;

pub const DEFAULT_OPEN_ALIAS: &str = "hdvault.open";
pub const DEFAULT_LOCKSCREEN_ALIAS: &str = "hdvault.lockscreen";
pub const DEFAULT_BIOMETRIC_ALIAS: &str = "hdvault.biometric";
pub const DEFAULT_LOCKSCREEN_VALIDITY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultOptions {
    pub open_alias: String,
    pub lockscreen_alias: String,
    pub biometric_alias: String,
    /// How long a lock-screen authentication keeps the key usable
    pub lockscreen_validity: Duration,
    pub durability: KeyDurability,
    /// Path whose address labels a seed
    pub root_path: String,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            open_alias: DEFAULT_OPEN_ALIAS.to_string(),
            lockscreen_alias: DEFAULT_LOCKSCREEN_ALIAS.to_string(),
            biometric_alias: DEFAULT_BIOMETRIC_ALIAS.to_string(),
            lockscreen_validity: DEFAULT_LOCKSCREEN_VALIDITY,
            durability: KeyDurability::default(),
            root_path: ROOT_DERIVATION_PATH.to_string(),
        }
    }
}

/// Prompt text and cancellation for one request.
#[derive(Debug, Clone, Default)]
pub struct AuthPrompt {
    pub text: String,
    pub cancel: CancellationToken,
}

impl AuthPrompt {
    pub fn new(text: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            text: text.into(),
            cancel,
        }
    }
}

impl From<&str> for AuthPrompt {
    fn from(text: &str) -> Self {
        Self::new(text, CancellationToken::new())
    }
}

impl From<String> for AuthPrompt {
    fn from(text: String) -> Self {
        Self::new(text, CancellationToken::new())
    }
}

/// Result of creating or importing a seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedIdentity {
    pub label: String,
    /// Base64 of the uncompressed root public key
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAccount {
    pub address: String,
    pub public_key: String,
}

pub struct HdVault {
    store: SeedStore,
    open: KeyProtection,
    lockscreen: KeyProtection,
    biometric: KeyProtection,
    durability: KeyDurability,
    root_path: DerivationPath,
}

impl HdVault {
    pub fn new(
        keys: Arc<dyn SecureKeyProvisioner>,
        surface: Arc<dyn AuthPromptSurface>,
        kv: Arc<dyn DurableKeyValueStore>,
        options: VaultOptions,
    ) -> Result<Self> {
        let root_path = parse_path(&options.root_path)?;
        let gate = Arc::new(GateCoordinator::new(surface));

        Ok(Self {
            store: SeedStore::new(kv),
            open: KeyProtection::Open {
                alias: options.open_alias,
                keys: keys.clone(),
            },
            lockscreen: KeyProtection::LockScreen {
                alias: options.lockscreen_alias,
                validity: options.lockscreen_validity,
                keys: keys.clone(),
                gate: gate.clone(),
            },
            biometric: KeyProtection::Biometric {
                alias: options.biometric_alias,
                keys,
                gate,
            },
            durability: options.durability,
            root_path,
        })
    }

    fn protection(&self, level: ProtectionLevel) -> &KeyProtection {
        match level {
            ProtectionLevel::Open => &self.open,
            ProtectionLevel::LockScreen => &self.lockscreen,
            ProtectionLevel::Biometric => &self.biometric,
        }
    }

    /// Provision the wrapping key of `level`. Idempotent.
    pub fn ensure_protection_key(&self, level: ProtectionLevel) -> Result<()> {
        self.protection(level).generate_protection_key(self.durability)
    }

    /// Provision the wrapping keys of every level.
    pub fn ensure_protection_keys(&self) -> Result<()> {
        ProtectionLevel::ALL
            .into_iter()
            .try_for_each(|level| self.ensure_protection_key(level))
    }

    pub async fn has_seed(&self) -> Result<bool> {
        self.store.has_any_seed()
    }

    pub async fn list_seeds(&self) -> Result<Vec<String>> {
        self.store.list_seeds()
    }

    pub fn validate_mnemonic(&self, phrase: &str) -> bool {
        seed::validate_mnemonic(phrase)
    }

    pub async fn protection_level(&self, label: &str) -> Result<ProtectionLevel> {
        self.store.level(label).await
    }

    /// Generate a 12-word seed and store it under `level`.
    pub async fn create_seed(&self, level: ProtectionLevel) -> Result<SeedIdentity> {
        let entropy = generate_entropy();
        let identity = self.store_entropy(level, &entropy).await?;
        log::info!("Created seed {} ({})", identity.label, level);
        Ok(identity)
    }

    /// Store the seed of `phrase` under `level`, replacing a seed with the same label.
    pub async fn import_seed(&self, level: ProtectionLevel, phrase: &str) -> Result<SeedIdentity> {
        let mnemonic = parse_mnemonic(phrase)?;
        let entropy = mnemonic_to_entropy(&mnemonic);
        drop(mnemonic);
        let identity = self.store_entropy(level, &entropy).await?;
        log::info!("Imported seed {} ({})", identity.label, level);
        Ok(identity)
    }

    async fn store_entropy(&self, level: ProtectionLevel, entropy: &[u8]) -> Result<SeedIdentity> {
        let protection = self.protection(level);
        protection.generate_protection_key(self.durability)?;

        let identity = {
            let root = derive_from_entropy(entropy, &self.root_path)?;
            SeedIdentity {
                label: root.address(),
                public_key: root.encoded_public_key(),
            }
        };
        let payload = protection.encrypt(&identity.label, entropy)?;
        self.store.save(&identity.label, level, &payload).await?;
        Ok(identity)
    }

    pub async fn delete_seed(&self, label: &str) -> Result<()> {
        self.store.delete(label).await?;
        log::info!("Deleted seed {}", label);
        Ok(())
    }

    pub async fn sign_transaction(
        &self,
        label: &str,
        path: &str,
        payload: &[u8],
        prompt: AuthPrompt,
    ) -> Result<SignatureData> {
        self.sign_with(label, path, payload, SigningScheme::Transaction, prompt)
            .await
    }

    /// EIP-191 personal message signature.
    pub async fn sign_message(
        &self,
        label: &str,
        path: &str,
        message: &[u8],
        prompt: AuthPrompt,
    ) -> Result<SignatureData> {
        self.sign_with(label, path, message, SigningScheme::PersonalMessage, prompt)
            .await
    }

    /// ES256K-R signature over a JWT signing input.
    pub async fn sign_jwt(
        &self,
        label: &str,
        path: &str,
        signing_input: &[u8],
        prompt: AuthPrompt,
    ) -> Result<SignatureData> {
        self.sign_with(label, path, signing_input, SigningScheme::Jwt, prompt)
            .await
    }

    async fn sign_with(
        &self,
        label: &str,
        path: &str,
        payload: &[u8],
        scheme: SigningScheme,
        prompt: AuthPrompt,
    ) -> Result<SignatureData> {
        let path = parse_path(path)?;
        self.with_entropy(label, prompt, |entropy| {
            let key = derive_from_entropy(entropy, &path)?;
            Ok(sign(key.secret_key(), payload, scheme)?)
        })
        .await
    }

    pub async fn derive_address(
        &self,
        label: &str,
        path: &str,
        prompt: AuthPrompt,
    ) -> Result<DerivedAccount> {
        let path = parse_path(path)?;
        self.with_entropy(label, prompt, |entropy| {
            let key = derive_from_entropy(entropy, &path)?;
            Ok(DerivedAccount {
                address: key.address(),
                public_key: key.encoded_public_key(),
            })
        })
        .await
    }

    pub async fn reveal_seed_phrase(
        &self,
        label: &str,
        prompt: AuthPrompt,
    ) -> Result<Zeroizing<String>> {
        self.with_entropy(label, prompt, |entropy| {
            let mnemonic = entropy_to_mnemonic(entropy)?;
            Ok(mnemonic_phrase(&mnemonic))
        })
        .await
    }

    /// Decrypt the entropy of `label` and hand it to `terminal`.
    ///
    /// The store lock is released before any prompt, and the plaintext is
    /// dropped (and wiped) before returning.
    async fn with_entropy<T>(
        &self,
        label: &str,
        prompt: AuthPrompt,
        terminal: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<T> {
        let result = async {
            let stored = self.store.load(label).await?;
            let entropy = self
                .protection(stored.level)
                .decrypt(&prompt.text, &stored.payload, &prompt.cancel)
                .await?;
            terminal(&entropy[..])
        }
        .await;

        if let Err(e) = &result {
            if e.category() == ErrorCategory::Crypto {
                log::error!("Unexpected crypto failure for {}: {}", label, e);
            }
        }
        result
    }
}
