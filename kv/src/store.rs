//! Core KvStore implementation

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{KvError, KvResult};
use crate::slot::Slot;

const VERSION_FILE: &str = ".version";
const LOCK_FILE: &str = ".lock";
const KEY_EXT: &str = "json";

/// Where a change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Written through this `KvStore` instance
    Local,
    /// Written by another process, picked up by `sync_external`
    External,
}

/// Notification broadcast for every write or removal
#[derive(Debug, Clone)]
pub struct KvChange {
    pub key: String,
    /// New value, `None` when the key was removed
    pub value: Option<Value>,
    pub origin: ChangeOrigin,
}

/// Exclusive advisory lock on the store directory, released on drop
struct DirLock(File);

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.0) {
            debug!(error = %e, "DirLock::drop: unlock failed");
        }
    }
}

/// File-backed key-value store
pub struct KvStore {
    dir: PathBuf,
    tx: broadcast::Sender<KvChange>,
    /// Raw JSON of every key as this process last wrote or observed it
    seen: Mutex<HashMap<String, String>>,
}

impl KvStore {
    /// Open (or create) a store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>) -> KvResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        debug!(dir = %dir.display(), "open: called");
        fs::create_dir_all(&dir)?;

        let (tx, _) = broadcast::channel(crate::DEFAULT_CHANNEL_CAPACITY);
        let store = Self {
            dir,
            tx,
            seen: Mutex::new(HashMap::new()),
        };

        let snapshot = store.snapshot()?;
        info!(dir = %store.dir.display(), keys = snapshot.len(), "KvStore opened");
        *store.seen.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;

        Ok(store)
    }

    /// Directory this store lives in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a key, falling back to `default` when it is unset or unreadable
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.read(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                warn!(%key, error = %e, "Error reading key, using default");
                default
            }
        }
    }

    /// Read a key, distinguishing "unset" from "present"
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> KvResult<Option<T>> {
        debug!(%key, "read: called");
        validate_key(key)?;
        let path = self.key_path(key);
        if !path.exists() {
            debug!(%key, "read: key not set");
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Persist a value, then notify every subscriber exactly once
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> KvResult<()> {
        debug!(%key, "set: called");
        validate_key(key)?;
        let value = serde_json::to_value(value)?;
        let raw = serde_json::to_string(&value)?;

        {
            let _lock = self.lock()?;
            self.write_locked(key, &raw)?;
        }

        self.notify(KvChange {
            key: key.to_string(),
            value: Some(value),
            origin: ChangeOrigin::Local,
        });
        Ok(())
    }

    /// Read-modify-write a key under the directory lock
    ///
    /// `f` receives the stored value (or `default` when unset) and returns
    /// whether it changed; only then is the value written and broadcast.
    /// Writers in other processes cannot interleave between the read and the
    /// write. Returns what `f` returned.
    pub fn update<T, F>(&self, key: &str, default: T, f: F) -> KvResult<bool>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> bool,
    {
        debug!(%key, "update: called");
        validate_key(key)?;

        let value = {
            let _lock = self.lock()?;
            let mut current = self.read(key)?.unwrap_or(default);
            if !f(&mut current) {
                debug!(%key, "update: unchanged");
                return Ok(false);
            }
            let value = serde_json::to_value(&current)?;
            self.write_locked(key, &serde_json::to_string(&value)?)?;
            value
        };

        self.notify(KvChange {
            key: key.to_string(),
            value: Some(value),
            origin: ChangeOrigin::Local,
        });
        Ok(true)
    }

    /// Remove a key; returns whether it existed
    pub fn remove(&self, key: &str) -> KvResult<bool> {
        debug!(%key, "remove: called");
        validate_key(key)?;

        let existed = {
            let _lock = self.lock()?;
            let path = self.key_path(key);
            let existed = path.exists();
            if existed {
                fs::remove_file(&path)?;
                self.bump_version()?;
            }
            self.seen_mut().remove(key);
            existed
        };

        if existed {
            self.notify(KvChange {
                key: key.to_string(),
                value: None,
                origin: ChangeOrigin::Local,
            });
        }
        Ok(existed)
    }

    /// All keys currently persisted, sorted
    pub fn keys(&self) -> KvResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(KEY_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && !stem.starts_with('.')
            {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Subscribe to changes for all keys
    pub fn subscribe(&self) -> broadcast::Receiver<KvChange> {
        self.tx.subscribe()
    }

    /// Create an unmounted typed handle for one key
    pub fn slot<T>(self: &Arc<Self>, key: impl Into<String>, default: T) -> Slot<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        Slot::new(Arc::clone(self), key.into(), default)
    }

    /// Current value of the write counter (0 for a fresh store)
    pub fn version(&self) -> u64 {
        fs::read_to_string(self.dir.join(VERSION_FILE))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Pick up writes made by other processes
    ///
    /// Compares every key file with what this process last saw and broadcasts
    /// an `External` change for each difference. Returns the changed keys.
    pub fn sync_external(&self) -> KvResult<Vec<String>> {
        debug!("sync_external: called");
        let mut changes = Vec::new();

        {
            let _lock = self.lock()?;
            let current = self.snapshot()?;
            let mut seen = self.seen_mut();

            for (key, raw) in &current {
                if seen.get(key) == Some(raw) {
                    continue;
                }
                match serde_json::from_str::<Value>(raw) {
                    Ok(value) => changes.push((key.clone(), Some(value))),
                    Err(e) => warn!(%key, error = %e, "sync_external: skipping unparseable value"),
                }
            }
            for key in seen.keys() {
                if !current.contains_key(key) {
                    changes.push((key.clone(), None));
                }
            }

            *seen = current;
        }

        let keys = changes.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>();
        for (key, value) in changes {
            debug!(%key, removed = value.is_none(), "sync_external: external change");
            self.notify(KvChange {
                key,
                value,
                origin: ChangeOrigin::External,
            });
        }
        Ok(keys)
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, KEY_EXT))
    }

    fn snapshot(&self) -> KvResult<HashMap<String, String>> {
        let mut map = HashMap::new();
        for key in self.keys()? {
            match fs::read_to_string(self.key_path(&key)) {
                Ok(raw) => {
                    map.insert(key, raw);
                }
                // Removed between listing and reading
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(map)
    }

    fn lock(&self) -> KvResult<DirLock> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(LOCK_FILE))?;
        FileExt::lock_exclusive(&file)?;
        Ok(DirLock(file))
    }

    /// Caller holds the directory lock
    fn write_locked(&self, key: &str, raw: &str) -> KvResult<()> {
        let tmp = self.dir.join(format!(".{}.tmp", key));
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, self.key_path(key))?;
        self.bump_version()?;
        self.seen_mut().insert(key.to_string(), raw.to_string());
        Ok(())
    }

    fn bump_version(&self) -> KvResult<()> {
        let next = self.version() + 1;
        fs::write(self.dir.join(VERSION_FILE), next.to_string())?;
        Ok(())
    }

    fn seen_mut(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, change: KvChange) {
        // No subscribers is fine
        let _ = self.tx.send(change);
    }
}

fn validate_key(key: &str) -> KvResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(KvError::InvalidKey(key.to_string()))
    }
}
