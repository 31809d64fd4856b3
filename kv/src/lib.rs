//! KvStore - file-backed key-value slots with change subscriptions
//!
//! Holds small JSON values (user preferences, a cached history list) that must
//! survive restarts and stay in sync between every consumer of the same key,
//! whether it lives in this process or another one.
//!
//! # Architecture
//!
//! ```text
//! {dir}/
//! ├── .version          # monotonically increasing write counter
//! ├── .lock             # advisory lock held during writes
//! ├── user_mail.json    # one file per key
//! └── history.json
//! ```
//!
//! In-process consumers are notified through a broadcast channel on every
//! `set`/`remove`. Other processes notice writes through the `.version` file;
//! the optional [`watcher`] task polls it and re-broadcasts foreign changes.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kvstore::KvStore;
//!
//! let store = Arc::new(KvStore::open("/tmp/kv")?);
//! let mut mail = store.slot("user_mail", String::new());
//! assert!(mail.value().is_none()); // not mounted yet
//! mail.mount();
//! mail.set("me@example.com".to_string())?;
//! ```

pub mod cli;
mod error;
mod slot;
mod store;
pub mod watcher;

pub use error::{KvError, KvResult};
pub use slot::Slot;
pub use store::{ChangeOrigin, KvChange, KvStore};

/// Default broadcast capacity for change notifications
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;
