//! KvStore error types

use thiserror::Error;

/// Errors from key-value operations
#[derive(Debug, Error)]
pub enum KvError {
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type KvResult<T> = Result<T, KvError>;
