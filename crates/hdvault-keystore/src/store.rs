//! Seed store
//!
//! Two entries per seed in the key-value store:
//!
//! - `seed_<label>`: the encoded envelope
//! - `level_<label>`: the protection level, `OPEN | LOCKSCREEN | BIOMETRIC`
//!
//! A seed exists only while both entries do; anything else is an orphan and is
//! skipped by enumeration. Writes for one label are serialized by a per-label
//! async lock, reads share it. A label's lock lives in the map only while
//! someone holds or waits on it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, VaultError};
use crate::platform::{DurableKeyValueStore, StoreError};
use crate::protection::ProtectionLevel;

pub const SEED_KEY_PREFIX: &str = "seed_";
pub const LEVEL_KEY_PREFIX: &str = "level_";

fn seed_key(label: &str) -> String {
    format!("{}{}", SEED_KEY_PREFIX, label)
}

fn level_key(label: &str) -> String {
    format!("{}{}", LEVEL_KEY_PREFIX, label)
}

/// Payload and level of one stored seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSeed {
    pub label: String,
    pub level: ProtectionLevel,
    pub payload: String,
}

type LockMap = HashMap<String, Arc<RwLock<()>>>;

pub struct SeedStore {
    kv: Arc<dyn DurableKeyValueStore>,
    locks: Mutex<LockMap>,
}

/// Handle on one label's lock. The map entry goes away with the last handle.
struct LabelLock<'a> {
    store: &'a SeedStore,
    label: &'a str,
    lock: Arc<RwLock<()>>,
}

impl LabelLock<'_> {
    async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }
}

impl Drop for LabelLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.store.lock_map();
        // Release our handle under the map lock so the count below is exact
        drop(std::mem::take(&mut self.lock));
        if locks
            .get(self.label)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(self.label);
        }
    }
}

impl SeedStore {
    pub fn new(kv: Arc<dyn DurableKeyValueStore>) -> Self {
        Self {
            kv,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_map(&self) -> MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn label_lock<'a>(&'a self, label: &'a str) -> LabelLock<'a> {
        let lock = self
            .lock_map()
            .entry(label.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone();
        LabelLock {
            store: self,
            label,
            lock,
        }
    }

    fn read_level(&self, label: &str) -> Result<Option<ProtectionLevel>> {
        let Some(raw) = self.kv.get(&level_key(label))? else {
            return Ok(None);
        };
        let text = String::from_utf8(raw)
            .map_err(|_| VaultError::MalformedPayload(format!("level of {} is not UTF-8", label)))?;
        text.parse::<ProtectionLevel>()
            .map(Some)
            .map_err(VaultError::MalformedPayload)
    }

    /// Whether at least one complete seed is stored.
    pub fn has_any_seed(&self) -> Result<bool> {
        Ok(!self.list_seeds()?.is_empty())
    }

    /// Labels with both entries present and a readable level, sorted.
    ///
    /// An unparseable level counts as an orphan. Store failures are returned.
    pub fn list_seeds(&self) -> Result<Vec<String>> {
        let keys = self.kv.list_keys()?;
        let leveled: HashSet<&str> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(LEVEL_KEY_PREFIX))
            .collect();

        let mut labels = Vec::new();
        for label in keys.iter().filter_map(|key| key.strip_prefix(SEED_KEY_PREFIX)) {
            if !leveled.contains(label) {
                continue;
            }
            match self.read_level(label) {
                Ok(Some(_)) => labels.push(label.to_string()),
                Ok(None) => {}
                Err(VaultError::MalformedPayload(reason)) => {
                    log::debug!("Skipping {}: {}", label, reason);
                }
                Err(e) => return Err(e),
            }
        }
        labels.sort();
        labels.dedup();
        Ok(labels)
    }

    /// Protection level of `label`.
    pub async fn level(&self, label: &str) -> Result<ProtectionLevel> {
        Ok(self.load(label).await?.level)
    }

    pub async fn load(&self, label: &str) -> Result<StoredSeed> {
        let lock = self.label_lock(label);
        let _guard = lock.read().await;

        let not_found = || VaultError::SeedNotFound(label.to_string());
        let level = self.read_level(label)?.ok_or_else(not_found)?;
        let raw = self.kv.get(&seed_key(label))?.ok_or_else(not_found)?;
        let payload = String::from_utf8(raw)
            .map_err(|_| VaultError::MalformedPayload(format!("payload of {} is not UTF-8", label)))?;

        Ok(StoredSeed {
            label: label.to_string(),
            level,
            payload,
        })
    }

    /// Persist payload then level for `label`, replacing any previous seed.
    ///
    /// If the level write fails the payload entry is restored to what it was.
    /// If that restore fails too the error is [`StoreError::Inconsistent`].
    pub async fn save(&self, label: &str, level: ProtectionLevel, payload: &str) -> Result<()> {
        let lock = self.label_lock(label);
        let _guard = lock.write().await;

        let seed_key = seed_key(label);
        let previous = self.kv.get(&seed_key)?;
        self.kv.put(&seed_key, payload.as_bytes())?;

        if let Err(e) = self.kv.put(&level_key(label), level.as_str().as_bytes()) {
            log::warn!("Level write for {} failed, rolling back payload: {}", label, e);
            let rollback = match &previous {
                Some(old) => self.kv.put(&seed_key, old),
                None => self.kv.remove(&seed_key),
            };
            if let Err(rollback_err) = rollback {
                log::error!(
                    "Rollback for {} failed, payload and level may disagree: {}",
                    label,
                    rollback_err
                );
                return Err(StoreError::Inconsistent(format!(
                    "level write for {} failed ({}) and payload rollback failed ({}); \
                     the label may need repair",
                    label, e, rollback_err
                ))
                .into());
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove both entries of `label`. Absent labels are not an error.
    pub async fn delete(&self, label: &str) -> Result<()> {
        let lock = self.label_lock(label);
        let _guard = lock.write().await;

        // Level first: a crash in between leaves a payload-only orphan
        self.kv.remove(&level_key(label))?;
        self.kv.remove(&seed_key(label))?;
        Ok(())
    }
}
