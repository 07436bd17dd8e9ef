//! Key protection policies
//!
//! Envelope encryption under one of three protection levels. Each level binds
//! its own wrapping-key alias; the gated levels also hold the gate that can
//! unlock that key:
//!
//! | Level      | Private key usable            | Prompt      |
//! |------------|-------------------------------|-------------|
//! | Open       | always                        | none        |
//! | LockScreen | for a window after device auth| lock screen |
//! | Biometric  | once per ceremony             | biometric   |
//!
//! Decrypt is a small state machine: try the unwrap; if, and only if, the key
//! reports itself locked, run one gate challenge and retry exactly once.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hdvault_core::{crypto, Envelope, SecretBytes};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, VaultError};
use crate::gate::GateCoordinator;
use crate::platform::{
    AuthCeremony, GateKind, KeyDurability, KeySpec, ProvisionError,
    SecureKeyProvisioner, UserAuthentication,
};

/// Authentication strength guarding a seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtectionLevel {
    Open,
    LockScreen,
    Biometric,
}

impl ProtectionLevel {
    pub const ALL: [ProtectionLevel; 3] = [Self::Open, Self::LockScreen, Self::Biometric];

    /// Stored form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::LockScreen => "LOCKSCREEN",
            Self::Biometric => "BIOMETRIC",
        }
    }
}

impl fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtectionLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown protection level: {}", s))
    }
}

/// A protection level bound to its key alias and, when gated, its gate.
pub enum KeyProtection {
    Open {
        alias: String,
        keys: Arc<dyn SecureKeyProvisioner>,
    },
    LockScreen {
        alias: String,
        validity: Duration,
        keys: Arc<dyn SecureKeyProvisioner>,
        gate: Arc<GateCoordinator>,
    },
    Biometric {
        alias: String,
        keys: Arc<dyn SecureKeyProvisioner>,
        gate: Arc<GateCoordinator>,
    },
}

/// Why one unwrap attempt didn't produce plaintext.
enum AttemptError {
    Locked,
    Fatal(VaultError),
}

impl From<ProvisionError> for AttemptError {
    fn from(e: ProvisionError) -> Self {
        match e {
            ProvisionError::AuthRequired(_) => Self::Locked,
            other => Self::Fatal(other.into()),
        }
    }
}

/// A begun ceremony, ended on drop unless taken for an unwrap.
struct OpenCeremony<'a> {
    keys: &'a dyn SecureKeyProvisioner,
    ceremony: Option<AuthCeremony>,
}

impl Drop for OpenCeremony<'_> {
    fn drop(&mut self) {
        if let Some(ceremony) = self.ceremony.take() {
            self.keys.end_ceremony(ceremony);
        }
    }
}

impl KeyProtection {
    pub fn level(&self) -> ProtectionLevel {
        match self {
            Self::Open { .. } => ProtectionLevel::Open,
            Self::LockScreen { .. } => ProtectionLevel::LockScreen,
            Self::Biometric { .. } => ProtectionLevel::Biometric,
        }
    }

    pub fn alias(&self) -> &str {
        match self {
            Self::Open { alias, .. }
            | Self::LockScreen { alias, .. }
            | Self::Biometric { alias, .. } => alias,
        }
    }

    fn keys(&self) -> &dyn SecureKeyProvisioner {
        match self {
            Self::Open { keys, .. } | Self::LockScreen { keys, .. } | Self::Biometric { keys, .. } => {
                keys.as_ref()
            }
        }
    }

    fn gate(&self) -> Option<(&GateCoordinator, GateKind)> {
        match self {
            Self::Open { .. } => None,
            Self::LockScreen { gate, .. } => Some((gate.as_ref(), GateKind::LockScreen)),
            Self::Biometric { gate, .. } => Some((gate.as_ref(), GateKind::Biometric)),
        }
    }

    fn key_spec(&self, durability: KeyDurability) -> KeySpec {
        let authentication = match self {
            Self::Open { .. } => UserAuthentication::None,
            Self::LockScreen { validity, .. } => UserAuthentication::TimeBoxed(*validity),
            Self::Biometric { .. } => UserAuthentication::PerUse,
        };
        KeySpec {
            authentication,
            durability,
        }
    }

    /// Provision this level's wrapping key pair; a no-op once it exists.
    pub fn generate_protection_key(&self, durability: KeyDurability) -> Result<()> {
        self.keys()
            .ensure_key_pair(self.alias(), &self.key_spec(durability))
            .map_err(VaultError::from)
    }

    /// Seal `plaintext` under a fresh symmetric key and wrap that key.
    ///
    /// Returns the encoded envelope. Nothing is persisted.
    pub fn encrypt(&self, purpose: &str, plaintext: &[u8]) -> Result<String> {
        log::debug!("Encrypting for {} under {}", purpose, self.alias());
        let sealed = crypto::seal(plaintext)?;
        let wrapped_key = self.keys().wrap_cipher(self.alias())?.wrap(&*sealed.key)?;
        Ok(Envelope::new(wrapped_key, sealed.iv, sealed.ciphertext, sealed.tag).encode())
    }

    /// Open an envelope produced by [`Self::encrypt`].
    ///
    /// `purpose` is shown to the user if a gate challenge is needed. At most one
    /// challenge and one retry happen per call.
    pub async fn decrypt(
        &self,
        purpose: &str,
        payload: &str,
        cancel: &CancellationToken,
    ) -> Result<SecretBytes> {
        let envelope = Envelope::decode(payload)?;

        match self.attempt(&envelope, None) {
            Ok(plaintext) => return Ok(plaintext),
            Err(AttemptError::Fatal(e)) => return Err(e),
            Err(AttemptError::Locked) => {}
        }

        let Some((gate, kind)) = self.gate() else {
            return Err(VaultError::Crypto(format!(
                "open key {} reported itself locked",
                self.alias()
            )));
        };

        // Claim first so a busy alias never starts a ceremony
        let pending = gate.claim(self.alias())?;
        let mut ceremony = OpenCeremony {
            keys: self.keys(),
            ceremony: match kind {
                GateKind::Biometric => Some(self.keys().begin_ceremony(self.alias())?),
                GateKind::LockScreen => None,
            },
        };
        let id = ceremony.ceremony.as_ref().map(AuthCeremony::id);
        pending
            .present(kind, purpose.to_string(), id, cancel)
            .await?;

        match self.attempt(&envelope, ceremony.ceremony.take()) {
            Ok(plaintext) => Ok(plaintext),
            Err(AttemptError::Locked) => Err(VaultError::AuthFailed(format!(
                "key {} still locked after authentication",
                self.alias()
            ))),
            Err(AttemptError::Fatal(e)) => Err(e),
        }
    }

    fn attempt(
        &self,
        envelope: &Envelope,
        ceremony: Option<AuthCeremony>,
    ) -> std::result::Result<SecretBytes, AttemptError> {
        let unwrapper = self.keys().unwrap_cipher(self.alias(), ceremony)?;
        let key = unwrapper.unwrap(&envelope.wrapped_key)?;
        let plaintext = crypto::open(&key, &envelope.iv, &envelope.ciphertext, &envelope.tag)
            .map_err(|e| AttemptError::Fatal(e.into()))?;
        Ok(SecretBytes::from_slice(&plaintext))
    }
}
