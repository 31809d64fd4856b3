//! glossaryd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::ResponseMode;

/// Main glossaryd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Workflow engine configuration
    pub engine: EngineConfig,

    /// History store configuration
    pub history: HistoryConfig,

    /// Remote resource deletion configuration
    pub deletion: DeletionConfig,

    /// Background runner configuration
    pub runner: RunnerConfig,

    /// Local storage configuration
    pub storage: StorageConfig,
}

impl Config {
    /// Validate configuration before calling the engine
    ///
    /// Checks that the API key environment variable is set. Call this early in
    /// commands that generate, to fail fast with a clear error message.
    pub fn validate(&self) -> Result<()> {
        if std::env::var(&self.engine.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "Workflow API key not found. Set the {} environment variable.",
                self.engine.api_key_env
            ));
        }
        Ok(())
    }

    /// Load configuration from the first file found
    ///
    /// An explicit path must load. Otherwise `./.glossaryd.yml`, then
    /// `<config_dir>/glossaryd/glossaryd.yml` are tried; unreadable candidates
    /// are skipped with a warning and defaults apply when none loads.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::read_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if !candidate.exists() {
                continue;
            }
            match Self::read_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!(path = %candidate.display(), error = %e, "Skipping unreadable config"),
            }
        }

        tracing::info!("No glossaryd config found, using defaults");
        Ok(Self::default())
    }

    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".glossaryd.yml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("glossaryd").join("glossaryd.yml"));
        }
        paths
    }

    fn read_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).context("Failed to read config file")?;
        let config = serde_yaml::from_str(&text).context("Failed to parse config file")?;
        tracing::info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Webhook used for remote deletion: explicit, else the history webhook
    pub fn deletion_webhook_url(&self) -> Option<&str> {
        self.deletion
            .webhook_url
            .as_deref()
            .or(self.history.webhook_url.as_deref())
    }
}

/// Workflow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// API base URL (the `/chat-messages` path is appended)
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// Fixed end-user identifier sent with every request
    pub user: String,

    /// Streaming (progress events) or blocking (single answer)
    #[serde(rename = "response-mode")]
    pub response_mode: ResponseMode,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.dify.ai/v1".to_string(),
            api_key_env: "DIFY_API_KEY".to_string(),
            user: "ux-glossary-web-user".to_string(),
            response_mode: ResponseMode::Streaming,
            // Matches the 5 minute limit the streaming endpoint was deployed with
            timeout_ms: 300_000,
        }
    }
}

/// History store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Webhook for the remote history store; unset keeps history locally
    #[serde(rename = "webhook-url")]
    pub webhook_url: Option<String>,

    /// How long a fetched history list is reused by non-forced refetches
    #[serde(rename = "cache-ttl-secs")]
    pub cache_ttl_secs: u64,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl HistoryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            cache_ttl_secs: 30,
            timeout_ms: 30_000,
        }
    }
}

/// Remote resource deletion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletionConfig {
    /// Deletion webhook; falls back to `history.webhook-url`
    #[serde(rename = "webhook-url")]
    pub webhook_url: Option<String>,
}

/// Background runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Fallback polling interval for pending terms (in seconds)
    #[serde(rename = "poll-interval-secs")]
    pub poll_interval_secs: u64,

    /// Maximum terms generating at once
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            max_concurrent: 8,
        }
    }
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for local state (kv store, logs)
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn kv_dir(&self) -> PathBuf {
        self.data_dir.join("kv")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("glossaryd"),
        }
    }
}
