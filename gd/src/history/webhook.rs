//! Webhook-backed history store
//!
//! Every call is a JSON POST to a single endpoint, discriminated by `action`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use super::{HistoryError, HistoryStore};
use crate::domain::{Term, TermUpdate};

pub struct WebhookHistoryStore {
    url: String,
    http: Client,
}

impl WebhookHistoryStore {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, HistoryError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { url: url.into(), http })
    }

    async fn call(&self, payload: Value) -> Result<Value, HistoryError> {
        debug!(action = %payload["action"], "call: called");
        let response = self.http.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            warn!(status = %status.as_u16(), body = %text, "History webhook returned an error status");
            return Err(HistoryError::Status(status.as_u16()));
        }

        debug!(body = %text, "call: raw response");
        let value: Value = serde_json::from_str(&text).map_err(|e| {
            warn!(body = %text, "Failed to parse history webhook JSON");
            HistoryError::InvalidJson(e.to_string())
        })?;

        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
            return Err(HistoryError::Remote(message));
        }
        Ok(value)
    }
}

/// Pull the term list out of `{data:{history}}` or `{history}`
///
/// Rows that do not decode as terms are skipped.
fn parse_history(value: &Value) -> Result<Vec<Term>, HistoryError> {
    let rows = value
        .get("data")
        .and_then(|d| d.get("history"))
        .or_else(|| value.get("history"))
        .and_then(Value::as_array)
        .ok_or_else(|| HistoryError::InvalidJson("response has no history list".to_string()))?;

    let mut terms = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_value::<Term>(row.clone()) {
            Ok(term) => terms.push(term),
            Err(e) => warn!(error = %e, "Skipping undecodable history row"),
        }
    }
    Ok(terms)
}

#[async_trait]
impl HistoryStore for WebhookHistoryStore {
    async fn fetch_all(&self) -> Result<Vec<Term>, HistoryError> {
        let value = self.call(json!({ "action": "get_history" })).await?;
        parse_history(&value)
    }

    async fn save(&self, term: &Term) -> Result<(), HistoryError> {
        self.call(json!({ "action": "save_history", "historyItem": term }))
            .await
            .map(|_| ())
    }

    async fn update(&self, id: &str, update: &TermUpdate) -> Result<(), HistoryError> {
        self.call(json!({ "action": "update_history", "id": id, "updates": update }))
            .await
            .map(|_| ())
    }

    async fn delete(&self, id: &str) -> Result<(), HistoryError> {
        self.call(json!({ "action": "delete_history", "id": id }))
            .await
            .map(|_| ())
    }
}
