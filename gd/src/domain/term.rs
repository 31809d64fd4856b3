//! Term domain type
//!
//! One glossary generation request and its lifecycle record. The serialized
//! shape (camelCase) is shared with the history webhook.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Term status
///
/// Transitions are monotonic: `Pending -> Completed` or `Pending -> Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TermStatus {
    /// Waiting for (or undergoing) generation
    #[default]
    Pending,
    /// Generation finished, answer stored
    Completed,
    /// Generation failed
    Error,
}

impl TermStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for TermStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TermStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// Errors from term construction
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TermError {
    #[error("Topic must not be empty")]
    EmptyTopic,

    #[error("{field} must be between 0 and 1, got {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// User input for a new term
#[derive(Debug, Clone)]
pub struct NewTerm {
    pub topic: String,
    pub mail: String,
    pub difficulty: f64,
    pub literacy: f64,
    pub context: String,
}

impl NewTerm {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            mail: String::new(),
            difficulty: DEFAULT_SLIDER,
            literacy: DEFAULT_SLIDER,
            context: String::new(),
        }
    }
}

/// Slider value used when none is given
pub const DEFAULT_SLIDER: f64 = 0.5;

fn default_slider() -> f64 {
    DEFAULT_SLIDER
}

/// A glossary generation task and its history record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    /// Unique identifier, generated at creation
    pub id: String,

    pub topic: String,

    /// Notification address
    #[serde(default)]
    pub mail: String,

    #[serde(default = "default_slider")]
    pub difficulty: f64,

    #[serde(default = "default_slider")]
    pub literacy: f64,

    /// Free-text context passed to the workflow as the query
    #[serde(default)]
    pub context: String,

    /// Creation timestamp (Unix milliseconds)
    #[serde(default)]
    pub created_at: i64,

    #[serde(default)]
    pub status: TermStatus,

    /// Percent complete; informational only, never authoritative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_nodes: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,

    /// Article edit link extracted from the final answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wp_link: Option<String>,

    /// Full aggregated answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dify_response: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Set once remote deletion was refused because the article is published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_delete_protected: Option<bool>,
}

impl Term {
    /// Validate input and create a pending term with a fresh id
    pub fn create(input: NewTerm) -> Result<Self, TermError> {
        debug!(topic = %input.topic, "Term::create: called");
        let topic = input.topic.trim().to_string();
        if topic.is_empty() {
            return Err(TermError::EmptyTopic);
        }
        check_slider("difficulty", input.difficulty)?;
        check_slider("literacy", input.literacy)?;

        Ok(Self::with_id(uuid::Uuid::new_v4().to_string(), topic)
            .with_inputs(input.mail, input.difficulty, input.literacy, input.context))
    }

    /// Create with a specific ID (for testing or recovery)
    pub fn with_id(id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            mail: String::new(),
            difficulty: DEFAULT_SLIDER,
            literacy: DEFAULT_SLIDER,
            context: String::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
            status: TermStatus::Pending,
            progress: None,
            completed_nodes: None,
            current_node: None,
            wp_link: None,
            dify_response: None,
            error_message: None,
            is_delete_protected: None,
        }
    }

    fn with_inputs(mut self, mail: String, difficulty: f64, literacy: f64, context: String) -> Self {
        self.mail = mail;
        self.difficulty = difficulty;
        self.literacy = literacy;
        self.context = context;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == TermStatus::Pending
    }

    pub fn is_delete_protected(&self) -> bool {
        self.is_delete_protected.unwrap_or(false)
    }

    /// Merge a partial update, enforcing the lifecycle invariants
    ///
    /// Returns the part of `update` that actually took effect:
    /// - a terminal term only accepts the protection flag
    /// - progress stays at or below 99 while the term is pending
    /// - the protection flag is never cleared
    pub fn apply(&mut self, update: &TermUpdate) -> TermUpdate {
        debug!(id = %self.id, status = %self.status, "Term::apply: called");
        let mut applied = TermUpdate::default();

        if self.status.is_terminal() {
            if update.touches_lifecycle() {
                warn!(id = %self.id, status = %self.status, "Dropping update to terminal term");
            }
        } else {
            if let Some(status) = update.status
                && status != self.status
            {
                self.status = status;
                applied.status = Some(status);
            }
            if let Some(progress) = update.progress {
                let progress = if self.status == TermStatus::Pending {
                    progress.min(MAX_PENDING_PROGRESS)
                } else {
                    progress.min(100)
                };
                self.progress = Some(progress);
                applied.progress = Some(progress);
            }
            if let Some(n) = update.completed_nodes {
                self.completed_nodes = Some(n);
                applied.completed_nodes = Some(n);
            }
            set_field(&mut self.current_node, &update.current_node, &mut applied.current_node);
            set_field(&mut self.wp_link, &update.wp_link, &mut applied.wp_link);
            set_field(&mut self.dify_response, &update.dify_response, &mut applied.dify_response);
            set_field(&mut self.error_message, &update.error_message, &mut applied.error_message);
        }

        if update.is_delete_protected == Some(true) && !self.is_delete_protected() {
            self.is_delete_protected = Some(true);
            applied.is_delete_protected = Some(true);
        }

        applied
    }
}

/// Highest progress a pending term can report
pub const MAX_PENDING_PROGRESS: u8 = 99;

fn check_slider(field: &'static str, value: f64) -> Result<(), TermError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(TermError::OutOfRange { field, value })
    }
}

fn set_field(target: &mut Option<String>, source: &Option<String>, applied: &mut Option<String>) {
    if let Some(value) = source {
        *target = Some(value.clone());
        *applied = Some(value.clone());
    }
}

/// Partial update to a Term; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TermStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_nodes: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wp_link: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dify_response: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_delete_protected: Option<bool>,
}

impl TermUpdate {
    /// A workflow node began running
    pub fn node_started(title: impl Into<String>) -> Self {
        Self {
            current_node: Some(title.into()),
            ..Default::default()
        }
    }

    /// A workflow node finished
    pub fn node_finished(label: impl Into<String>, completed_nodes: u32, progress: u8) -> Self {
        Self {
            current_node: Some(label.into()),
            completed_nodes: Some(completed_nodes),
            progress: Some(progress),
            ..Default::default()
        }
    }

    /// Terminal success
    pub fn completed(answer: impl Into<String>, wp_link: Option<String>, label: impl Into<String>) -> Self {
        Self {
            status: Some(TermStatus::Completed),
            dify_response: Some(answer.into()),
            wp_link,
            current_node: Some(label.into()),
            progress: Some(100),
            ..Default::default()
        }
    }

    /// Terminal failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(TermStatus::Error),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Permanently block local deletion
    pub fn protect() -> Self {
        Self {
            is_delete_protected: Some(true),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn touches_lifecycle(&self) -> bool {
        self.status.is_some()
            || self.progress.is_some()
            || self.completed_nodes.is_some()
            || self.current_node.is_some()
            || self.wp_link.is_some()
            || self.dify_response.is_some()
            || self.error_message.is_some()
    }
}
