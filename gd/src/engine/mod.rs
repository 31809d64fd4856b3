//! Workflow engine integration
//!
//! Provides:
//! - Request/event wire types for the Dify chat-messages API
//! - WorkflowClient trait with streaming and blocking runs
//! - DifyClient over reqwest

mod client;
mod dify;
mod error;
mod types;

#[cfg(test)]
pub use client::mock;
pub use client::{ByteStream, WorkflowClient};
pub use dify::DifyClient;
pub use error::EngineError;
pub use types::{
    BlockingResponse, EMPTY_QUERY_PLACEHOLDER, EventKind, NodeData, ResponseMode, WorkflowEvent, WorkflowInputs,
    WorkflowRequest,
};
