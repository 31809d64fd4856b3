//! Wire types for the Dify chat-messages API

use serde::{Deserialize, Serialize};

use crate::domain::Term;

/// Query sent when the user gave no context ("nothing in particular")
pub const EMPTY_QUERY_PLACEHOLDER: &str = "特になし";

/// How the engine should deliver its answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// SSE stream of workflow events
    #[default]
    Streaming,
    /// One JSON body once the workflow is done
    Blocking,
}

/// Workflow input variables; names match the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowInputs {
    pub topic: String,
    #[serde(rename = "Target_Difficulty")]
    pub target_difficulty: f64,
    #[serde(rename = "Target_IT_Literacy")]
    pub target_it_literacy: f64,
    pub mail: String,
    #[serde(rename = "Target_Task_ID")]
    pub target_task_id: String,
}

/// Request body for `POST /chat-messages`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRequest {
    pub inputs: WorkflowInputs,
    pub query: String,
    pub response_mode: ResponseMode,
    pub user: String,
}

impl WorkflowRequest {
    /// Build the request for a term
    pub fn for_term(term: &Term, response_mode: ResponseMode, user: impl Into<String>) -> Self {
        let query = if term.context.trim().is_empty() {
            EMPTY_QUERY_PLACEHOLDER.to_string()
        } else {
            term.context.clone()
        };
        Self {
            inputs: WorkflowInputs {
                topic: term.topic.clone(),
                target_difficulty: term.difficulty,
                target_it_literacy: term.literacy,
                mail: term.mail.clone(),
                target_task_id: term.id.clone(),
            },
            query,
            response_mode,
            user: user.into(),
        }
    }
}

/// Node payload carried by `node_started` / `node_finished`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub title: Option<String>,
}

/// One decoded SSE event record
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowEvent {
    pub event: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub data: Option<NodeData>,
}

/// Classified event kinds the aggregator cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NodeStarted,
    NodeFinished,
    /// `message`, `agent_message` or `text_chunk`
    AnswerChunk,
    /// `workflow_finished` or `message_end`
    Finished,
    Other,
}

impl WorkflowEvent {
    pub fn kind(&self) -> EventKind {
        match self.event.as_str() {
            "node_started" => EventKind::NodeStarted,
            "node_finished" => EventKind::NodeFinished,
            "message" | "agent_message" | "text_chunk" => EventKind::AnswerChunk,
            "workflow_finished" | "message_end" => EventKind::Finished,
            _ => EventKind::Other,
        }
    }

    pub fn node_title(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.title.as_deref())
    }
}

/// Body returned in blocking mode
#[derive(Debug, Clone, Deserialize)]
pub struct BlockingResponse {
    #[serde(default)]
    pub answer: Option<String>,
}
