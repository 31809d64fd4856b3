//! History store error types

use thiserror::Error;

/// Errors from history persistence
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History store HTTP error: status {0}")]
    Status(u16),

    #[error("Invalid JSON from history store: {0}")]
    InvalidJson(String),

    #[error("History store reported an error: {0}")]
    Remote(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Local store error: {0}")]
    Kv(#[from] kvstore::KvError),

    #[error("Channel error")]
    ChannelClosed,
}
