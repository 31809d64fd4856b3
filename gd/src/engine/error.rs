//! Workflow engine error types

use thiserror::Error;

/// Errors that can occur while talking to the workflow engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Server responded with {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing API key: set the {0} environment variable")]
    MissingApiKey(String),
}

impl EngineError {
    /// HTTP status for API errors
    pub fn status(&self) -> Option<u16> {
        match self {
            EngineError::Api { status, .. } => Some(*status),
            EngineError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
