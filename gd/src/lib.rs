//! glossaryd - glossary article generation runner
//!
//! Submits glossary terms to a Dify workflow, follows each run's SSE stream
//! to report progress, and keeps the resulting history in an optimistic cache
//! mirrored to a durable store.
//!
//! # Architecture
//!
//! ```text
//! gd submit ──> HistoryCache ──(mirror actor)──> HistoryStore (webhook | kv)
//!                   │   ▲
//!       HistoryEvent│   │progress / terminal updates
//!                   ▼   │
//!               TaskRunner ──> WorkflowClient ──SSE──> StreamAggregator
//!
//! gd delete ──> DeletionCoordinator ──> ResourceDeleter ──> HistoryCache
//! ```

pub mod cli;
pub mod config;
pub mod deletion;
pub mod domain;
pub mod engine;
pub mod history;
pub mod links;
pub mod runner;
pub mod stream;

pub use config::Config;
pub use deletion::{DeletionCoordinator, DeletionError, DeletionOutcome, WebhookDeleter};
pub use domain::{NewTerm, Term, TermStatus, TermUpdate};
pub use engine::{DifyClient, EngineError, WorkflowClient};
pub use history::{HistoryCache, HistoryError, HistoryEvent, HistoryStore, LocalHistoryStore, WebhookHistoryStore};
pub use runner::{TaskRunner, TaskRunnerConfig};

/// kv key remembering the last notification address
pub const USER_MAIL_KEY: &str = "ux_glossary_user_mail";
