//! Software key provisioner
//!
//! A [`SecureKeyProvisioner`] without secure hardware. Wrapping key pairs are
//! secp256k1; a symmetric key is wrapped ECIES-style (ephemeral ECDH, then
//! AES-256-GCM under the shared secret).
//!
//! The device authentication window and biometric ceremonies are simulated:
//! a prompt surface reports a successful gesture with
//! [`SoftwareKeyProvisioner::record_authentication`] or
//! [`SoftwareKeyProvisioner::authorize_ceremony`].
//!
//! With [`SoftwareKeyProvisioner::persistent`] the private keys are kept in a
//! [`DurableKeyValueStore`] under `wrapkey_<alias>`. They are stored in the
//! clear, so this gives no protection beyond that of the store itself.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use bitcoin::secp256k1::ecdh::SharedSecret;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use hdvault_core::crypto::{self, IV_LEN, TAG_LEN};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::platform::{
    AuthCeremony, DurableKeyValueStore, KeySpec, ProvisionError, SecureKeyProvisioner,
    UnwrapCipher, UserAuthentication, WrapCipher,
};

/// Key prefix for persisted wrapping keys
pub const WRAP_KEY_PREFIX: &str = "wrapkey_";

const EPHEMERAL_LEN: usize = 33;

struct SoftwareKey {
    secret: SecretKey,
    public: PublicKey,
    spec: KeySpec,
    authenticated_at: Option<Instant>,
}

impl Drop for SoftwareKey {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedKey {
    secret: String,
    spec: KeySpec,
}

#[derive(Default)]
struct Inner {
    device_secure: bool,
    keys: HashMap<String, SoftwareKey>,
    issued: HashMap<u64, String>,
    authorized: HashSet<u64>,
}

pub struct SoftwareKeyProvisioner {
    inner: Mutex<Inner>,
    next_ceremony: AtomicU64,
    backing: Option<Arc<dyn DurableKeyValueStore>>,
}

impl Default for SoftwareKeyProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareKeyProvisioner {
    /// In-memory provisioner on a device with a lock screen configured.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                device_secure: true,
                ..Inner::default()
            }),
            next_ceremony: AtomicU64::new(1),
            backing: None,
        }
    }

    /// Provisioner whose wrapping keys live in `store`.
    pub fn persistent(store: Arc<dyn DurableKeyValueStore>) -> Self {
        Self {
            backing: Some(store),
            ..Self::new()
        }
    }

    /// Simulate whether the device has a lock-screen credential.
    pub fn set_device_secure(&self, secure: bool) {
        self.lock_inner().device_secure = secure;
    }

    /// A device authentication just succeeded; time-boxed keys open their window.
    pub fn record_authentication(&self, alias: &str) {
        if let Some(key) = self.lock_inner().keys.get_mut(alias) {
            key.authenticated_at = Some(Instant::now());
        }
    }

    /// Close the authentication window of `alias`.
    pub fn lock(&self, alias: &str) {
        if let Some(key) = self.lock_inner().keys.get_mut(alias) {
            key.authenticated_at = None;
        }
    }

    /// The user completed the gesture for ceremony `id`.
    pub fn authorize_ceremony(&self, id: u64) {
        let mut inner = self.lock_inner();
        if inner.issued.contains_key(&id) {
            inner.authorized.insert(id);
        }
    }

    /// Ceremonies begun and not yet spent.
    pub fn pending_ceremonies(&self) -> usize {
        self.lock_inner().issued.len()
    }

    pub fn has_key(&self, alias: &str) -> bool {
        self.lock_inner().keys.contains_key(alias)
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        // Inner holds no invariants a panic could break midway
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load a persisted key for `alias` into memory if one exists.
    fn load_persisted(&self, inner: &mut Inner, alias: &str) -> Result<(), ProvisionError> {
        let Some(store) = &self.backing else {
            return Ok(());
        };
        if inner.keys.contains_key(alias) {
            return Ok(());
        }
        let Some(raw) = store
            .get(&format!("{}{}", WRAP_KEY_PREFIX, alias))
            .map_err(|e| ProvisionError::Crypto(e.to_string()))?
        else {
            return Ok(());
        };

        let raw = Zeroizing::new(raw);
        let persisted: PersistedKey = serde_json::from_slice(&raw)
            .map_err(|e| ProvisionError::Crypto(format!("stored key {}: {}", alias, e)))?;
        let secret_hex = Zeroizing::new(persisted.secret);
        let secret_bytes = Zeroizing::new(
            hex::decode(secret_hex.as_str())
                .map_err(|e| ProvisionError::Crypto(format!("stored key {}: {}", alias, e)))?,
        );
        let secret = SecretKey::from_slice(&secret_bytes)
            .map_err(|e| ProvisionError::Crypto(e.to_string()))?;
        let public = secret.public_key(&Secp256k1::signing_only());

        inner.keys.insert(
            alias.to_string(),
            SoftwareKey {
                secret,
                public,
                spec: persisted.spec,
                authenticated_at: None,
            },
        );
        Ok(())
    }

    fn persist(&self, alias: &str, key: &SoftwareKey) -> Result<(), ProvisionError> {
        let Some(store) = &self.backing else {
            return Ok(());
        };
        let record = PersistedKey {
            secret: hex::encode(key.secret.secret_bytes()),
            spec: key.spec,
        };
        let encoded = Zeroizing::new(
            serde_json::to_vec(&record).map_err(|e| ProvisionError::Crypto(e.to_string()))?,
        );
        let _wipe = Zeroizing::new(record.secret);
        store
            .put(&format!("{}{}", WRAP_KEY_PREFIX, alias), &encoded)
            .map_err(|e| ProvisionError::Crypto(e.to_string()))
    }
}

impl SecureKeyProvisioner for SoftwareKeyProvisioner {
    fn ensure_key_pair(&self, alias: &str, spec: &KeySpec) -> Result<(), ProvisionError> {
        let mut inner = self.lock_inner();
        self.load_persisted(&mut inner, alias)?;
        if inner.keys.contains_key(alias) {
            return Ok(());
        }
        if spec.requires_auth() && !inner.device_secure {
            return Err(ProvisionError::AuthNotConfigured(format!(
                "{} needs a device lock screen",
                alias
            )));
        }

        let (secret, public) = Secp256k1::new().generate_keypair(&mut rand::thread_rng());
        let key = SoftwareKey {
            secret,
            public,
            spec: *spec,
            authenticated_at: None,
        };
        self.persist(alias, &key)?;
        inner.keys.insert(alias.to_string(), key);
        log::info!("Provisioned software wrapping key {}", alias);
        Ok(())
    }

    fn wrap_cipher(&self, alias: &str) -> Result<Box<dyn WrapCipher>, ProvisionError> {
        let mut inner = self.lock_inner();
        self.load_persisted(&mut inner, alias)?;
        let key = inner
            .keys
            .get(alias)
            .ok_or_else(|| ProvisionError::NotProvisioned(alias.to_string()))?;
        Ok(Box::new(EciesWrap { public: key.public }))
    }

    fn unwrap_cipher(
        &self,
        alias: &str,
        ceremony: Option<AuthCeremony>,
    ) -> Result<Box<dyn UnwrapCipher>, ProvisionError> {
        let mut inner = self.lock_inner();
        self.load_persisted(&mut inner, alias)?;

        // A presented ceremony is spent whether or not it unlocks anything
        let ceremony_ok = match ceremony {
            Some(c) => {
                inner.issued.remove(&c.id());
                inner.authorized.remove(&c.id()) && c.alias() == alias
            }
            None => false,
        };

        let key = inner
            .keys
            .get(alias)
            .ok_or_else(|| ProvisionError::NotProvisioned(alias.to_string()))?;

        let unlocked = match key.spec.authentication {
            UserAuthentication::None => true,
            UserAuthentication::TimeBoxed(window) => key
                .authenticated_at
                .is_some_and(|at| at.elapsed() <= window),
            UserAuthentication::PerUse => ceremony_ok,
        };
        if !unlocked {
            return Err(ProvisionError::AuthRequired(alias.to_string()));
        }

        Ok(Box::new(EciesUnwrap { secret: key.secret }))
    }

    fn begin_ceremony(&self, alias: &str) -> Result<AuthCeremony, ProvisionError> {
        let mut inner = self.lock_inner();
        self.load_persisted(&mut inner, alias)?;
        if !inner.keys.contains_key(alias) {
            return Err(ProvisionError::NotProvisioned(alias.to_string()));
        }
        let id = self.next_ceremony.fetch_add(1, Ordering::SeqCst);
        inner.issued.insert(id, alias.to_string());
        Ok(AuthCeremony::new(id, alias))
    }

    fn end_ceremony(&self, ceremony: AuthCeremony) {
        let mut inner = self.lock_inner();
        inner.issued.remove(&ceremony.id());
        inner.authorized.remove(&ceremony.id());
    }
}

struct EciesWrap {
    public: PublicKey,
}

impl WrapCipher for EciesWrap {
    fn wrap(&self, key: &[u8]) -> Result<Vec<u8>, ProvisionError> {
        let (mut ephemeral, ephemeral_pub) =
            Secp256k1::new().generate_keypair(&mut rand::thread_rng());
        let kek = Zeroizing::new(SharedSecret::new(&self.public, &ephemeral).secret_bytes());
        ephemeral.non_secure_erase();

        let (iv, ciphertext, tag) =
            crypto::seal_with_key(&kek, key).map_err(|e| ProvisionError::Crypto(e.to_string()))?;

        let mut out = Vec::with_capacity(EPHEMERAL_LEN + IV_LEN + ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&ephemeral_pub.serialize());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&tag);
        Ok(out)
    }
}

struct EciesUnwrap {
    secret: SecretKey,
}

impl Drop for EciesUnwrap {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

impl UnwrapCipher for EciesUnwrap {
    fn unwrap(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, ProvisionError> {
        if wrapped.len() < EPHEMERAL_LEN + IV_LEN + TAG_LEN {
            return Err(ProvisionError::Crypto("wrapped key too short".to_string()));
        }
        let (ephemeral, rest) = wrapped.split_at(EPHEMERAL_LEN);
        let (iv, rest) = rest.split_at(IV_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

        let ephemeral_pub =
            PublicKey::from_slice(ephemeral).map_err(|e| ProvisionError::Crypto(e.to_string()))?;
        let kek = Zeroizing::new(SharedSecret::new(&ephemeral_pub, &self.secret).secret_bytes());

        let mut iv_arr = [0u8; IV_LEN];
        iv_arr.copy_from_slice(iv);
        let mut tag_arr = [0u8; TAG_LEN];
        tag_arr.copy_from_slice(tag);

        crypto::open(kek.as_slice(), &iv_arr, ciphertext, &tag_arr)
            .map_err(|e| ProvisionError::Crypto(e.to_string()))
    }
}
