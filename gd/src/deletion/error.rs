//! Deletion error types

use thiserror::Error;

/// Failures that abort a deletion; the term is left in place
#[derive(Debug, Error)]
pub enum DeletionError {
    #[error("Deletion webhook responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid JSON from deletion webhook: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("No deletion webhook configured; set deletion.webhook-url")]
    NotConfigured,
}
