//! HistoryStore trait definition

use async_trait::async_trait;

use super::HistoryError;
use crate::domain::{Term, TermUpdate};

/// Durable home of the term list
///
/// The cache treats this as the source of truth on refetch; mutations are
/// mirrored to it after they were applied locally.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Full list, newest first
    async fn fetch_all(&self) -> Result<Vec<Term>, HistoryError>;

    async fn save(&self, term: &Term) -> Result<(), HistoryError>;

    async fn update(&self, id: &str, update: &TermUpdate) -> Result<(), HistoryError>;

    async fn delete(&self, id: &str) -> Result<(), HistoryError>;
}
