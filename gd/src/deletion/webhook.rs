//! Remote resource deletion over the webhook

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::DeletionError;

/// Body sent to the deletion webhook
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wp_link: Option<String>,
    pub doc_url: Vec<String>,
}

impl DeleteRequest {
    pub fn new(wp_link: Option<String>, doc_url: Vec<String>) -> Self {
        Self {
            action: "delete",
            wp_link,
            doc_url,
        }
    }
}

/// Webhook reply; per-resource failures come back in `errors`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteResponse {
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl DeleteResponse {
    pub fn with_errors<I, S>(errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            errors: errors.into_iter().map(|e| Value::String(e.into())).collect(),
            message: None,
        }
    }

    /// Error entries as text
    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
            .collect()
    }
}

/// Deletes the remote article draft and backing documents of a term
#[async_trait]
pub trait ResourceDeleter: Send + Sync {
    async fn delete_resources(&self, request: &DeleteRequest) -> Result<DeleteResponse, DeletionError>;
}

pub struct WebhookDeleter {
    url: String,
    http: Client,
}

impl WebhookDeleter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DeletionError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { url: url.into(), http })
    }
}

#[async_trait]
impl ResourceDeleter for WebhookDeleter {
    async fn delete_resources(&self, request: &DeleteRequest) -> Result<DeleteResponse, DeletionError> {
        debug!(wp_link = ?request.wp_link, doc_count = %request.doc_url.len(), "delete_resources: called");
        let response = self.http.post(&self.url).json(request).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(status = %status.as_u16(), %body, "Deletion webhook returned an error status");
            return Err(DeletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}
