//! Term deletion with remote resource cleanup

mod coordinator;
mod error;
mod webhook;

pub use coordinator::{DeletionCoordinator, DeletionOutcome, NOT_A_DRAFT};
pub use error::DeletionError;
#[cfg(test)]
pub use webhook::mock;
pub use webhook::{DeleteRequest, DeleteResponse, ResourceDeleter, WebhookDeleter};
