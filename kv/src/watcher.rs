//! Cross-process change watcher
//!
//! Polls the store's `.version` counter and, when another process has written,
//! re-broadcasts its changes to this process's subscribers. Optional: a
//! single-process consumer never needs it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::KvStore;

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Spawn a background task that syncs external writes into `store`
pub fn spawn_watcher(store: Arc<KvStore>, interval: Duration) -> JoinHandle<()> {
    info!(dir = %store.dir().display(), ?interval, "Starting kv watcher");
    tokio::spawn(async move {
        let mut last_version = store.version();
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let version = store.version();
            if version == last_version {
                continue;
            }
            debug!(last_version, version, "kv watcher: version moved");
            last_version = version;
            match store.sync_external() {
                Ok(keys) if !keys.is_empty() => debug!(?keys, "kv watcher: external changes"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "kv watcher: sync failed"),
            }
        }
    })
}
