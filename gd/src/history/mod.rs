//! Term history: optimistic cache in front of a durable store
//!
//! Provides:
//! - HistoryStore trait with webhook and local kv implementations
//! - HistoryCache with synchronous mutations and an ordered mirror queue

mod cache;
mod error;
mod local;
mod store;
mod webhook;

pub use cache::{DEFAULT_CACHE_TTL, HistoryCache, HistoryEvent};
pub use error::HistoryError;
pub use local::{HISTORY_KEY, LocalHistoryStore};
#[cfg(test)]
pub use store::mock;
pub use store::HistoryStore;
pub use webhook::WebhookHistoryStore;
