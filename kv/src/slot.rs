//! Slot - typed handle for one key with an explicit mount step
//!
//! A slot starts unmounted: `value()` is `None` until `mount()` has loaded the
//! persisted value (or the default). Consumers use this to tell "still the
//! default because nothing was stored" apart from "not loaded yet", so they
//! never act on a default that is about to be replaced.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::error::KvResult;
use crate::store::{KvChange, KvStore};

pub struct Slot<T> {
    store: Arc<KvStore>,
    key: String,
    default: T,
    value: Option<T>,
    rx: broadcast::Receiver<KvChange>,
}

impl<T> Slot<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub(crate) fn new(store: Arc<KvStore>, key: String, default: T) -> Self {
        debug!(%key, "Slot::new: called");
        // Subscribe before mounting so no change can slip between load and listen
        let rx = store.subscribe();
        Self {
            store,
            key,
            default,
            value: None,
            rx,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_mounted(&self) -> bool {
        self.value.is_some()
    }

    /// Current value, `None` until mounted
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Load the persisted value (or the default) and mark the slot mounted
    pub fn mount(&mut self) -> &T {
        debug!(key = %self.key, "Slot::mount: called");
        // Anything queued before the load is already reflected in it
        while self.rx.try_recv().is_ok() {}
        let loaded = self.store.get(&self.key, self.default.clone());
        self.value.insert(loaded)
    }

    /// Write through the store; every other subscriber sees the change once
    pub fn set(&mut self, value: T) -> KvResult<()> {
        debug!(key = %self.key, "Slot::set: called");
        self.store.set(&self.key, &value)?;
        self.value = Some(value);
        Ok(())
    }

    /// Apply any queued changes for this key without waiting
    ///
    /// Returns true if the value changed. Does nothing before mount.
    pub fn refresh(&mut self) -> bool {
        let mut changed = false;
        loop {
            match self.rx.try_recv() {
                Ok(change) => changed |= self.apply(change),
                Err(TryRecvError::Lagged(n)) => {
                    debug!(key = %self.key, n, "Slot::refresh: lagged, reloading");
                    changed |= self.reload();
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        changed
    }

    /// Wait for the next change to this key
    ///
    /// Returns `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<&T> {
        loop {
            match self.rx.recv().await {
                Ok(change) => {
                    if self.apply(change) {
                        return self.value.as_ref();
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    debug!(key = %self.key, n, "Slot::changed: lagged, reloading");
                    if self.reload() {
                        return self.value.as_ref();
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn apply(&mut self, change: KvChange) -> bool {
        if change.key != self.key || !self.is_mounted() {
            return false;
        }
        let next = match change.value {
            None => self.default.clone(),
            Some(raw) => match serde_json::from_value(raw) {
                Ok(v) => v,
                Err(e) => {
                    warn!(key = %self.key, error = %e, "Ignoring change with unexpected shape");
                    return false;
                }
            },
        };
        self.value = Some(next);
        true
    }

    fn reload(&mut self) -> bool {
        if !self.is_mounted() {
            return false;
        }
        self.value = Some(self.store.get(&self.key, self.default.clone()));
        true
    }
}
