//! Dify API client implementation
//!
//! Implements the WorkflowClient trait for the Dify `chat-messages` endpoint
//! in both streaming (SSE) and blocking response modes.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::{debug, warn};

use super::{BlockingResponse, ByteStream, EngineError, WorkflowClient, WorkflowRequest};
use crate::config::EngineConfig;

/// Dify API client
///
/// Requests are sent once; a failed run surfaces as an error for the caller
/// to record on the term rather than being retried.
pub struct DifyClient {
    base_url: String,
    api_key: String,
    http: Client,
}

impl DifyClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the configured environment variable.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        debug!(base_url = %config.base_url, api_key_env = %config.api_key_env, "from_config: called");
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| EngineError::MissingApiKey(config.api_key_env.clone()))?;
        Self::new(&config.base_url, api_key, config.timeout())
    }

    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let http = Client::builder().timeout(timeout).build().map_err(EngineError::Network)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat-messages", self.base_url)
    }

    async fn post(&self, request: &WorkflowRequest) -> Result<Response, EngineError> {
        let url = self.endpoint();
        debug!(%url, task_id = %request.inputs.target_task_id, "post: called");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(EngineError::Network)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "Workflow request rejected");
            return Err(EngineError::Api { status, message: text });
        }

        Ok(response)
    }
}

#[async_trait]
impl WorkflowClient for DifyClient {
    async fn open_stream(&self, request: WorkflowRequest) -> Result<ByteStream, EngineError> {
        debug!(topic = %request.inputs.topic, "open_stream: called");
        let response = self.post(&request).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(EngineError::Network));
        Ok(Box::pin(stream))
    }

    async fn run_blocking(&self, request: WorkflowRequest) -> Result<String, EngineError> {
        debug!(topic = %request.inputs.topic, "run_blocking: called");
        let response = self.post(&request).await?;
        let text = response.text().await.map_err(EngineError::Network)?;
        parse_blocking_answer(&text)
    }
}

fn parse_blocking_answer(body: &str) -> Result<String, EngineError> {
    let parsed: BlockingResponse = serde_json::from_str(body)?;
    parsed
        .answer
        .ok_or_else(|| EngineError::InvalidResponse("Response has no answer field".to_string()))
}
