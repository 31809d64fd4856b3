//! DeletionCoordinator - remote cleanup before local removal
//!
//! A term is removed locally only after its remote resources were handled:
//! a transport failure aborts, a published article makes the term
//! permanently undeletable, and any other per-resource error is tolerated.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{DeleteRequest, DeletionError, ResourceDeleter};
use crate::domain::TermUpdate;
use crate::history::HistoryCache;
use crate::links::extract_doc_links;

/// Error text the webhook uses for an article that is already published
pub const NOT_A_DRAFT: &str = "not a draft";

/// What a deletion request resulted in
#[derive(Debug, Clone, PartialEq)]
pub enum DeletionOutcome {
    /// No term with that id
    NotFound,
    /// Already protected; nothing was attempted
    Protected,
    /// Removed locally; `remote_errors` lists tolerated remote failures
    Deleted { remote_errors: Vec<String> },
    /// Remote refused because the article is published; the term is now protected
    NowProtected { errors: Vec<String> },
}

pub struct DeletionCoordinator {
    cache: HistoryCache,
    deleter: Option<Arc<dyn ResourceDeleter>>,
}

impl DeletionCoordinator {
    /// `deleter` is `None` when no webhook is configured; terms with remote
    /// resources then cannot be deleted
    pub fn new(cache: HistoryCache, deleter: Option<Arc<dyn ResourceDeleter>>) -> Self {
        Self { cache, deleter }
    }

    /// Delete a term using its stored article link and answer text
    pub async fn delete(&self, id: &str) -> Result<DeletionOutcome, DeletionError> {
        debug!(%id, "delete: called");
        let Some(term) = self.cache.get(id) else {
            debug!(%id, "delete: unknown id");
            return Ok(DeletionOutcome::NotFound);
        };
        self.delete_with(id, term.wp_link.as_deref(), term.dify_response.as_deref())
            .await
    }

    /// Delete a term given the article link and answer text to clean up after
    ///
    /// An id missing from the cache is a no-op; no remote call is made.
    pub async fn delete_with(
        &self,
        id: &str,
        wp_link: Option<&str>,
        response_text: Option<&str>,
    ) -> Result<DeletionOutcome, DeletionError> {
        debug!(%id, ?wp_link, "delete_with: called");
        let Some(term) = self.cache.get(id) else {
            debug!(%id, "delete_with: unknown id");
            return Ok(DeletionOutcome::NotFound);
        };
        if term.is_delete_protected() {
            info!(%id, "Term is delete-protected, skipping");
            return Ok(DeletionOutcome::Protected);
        }

        let wp_link = wp_link.filter(|l| !l.is_empty()).map(str::to_string);
        let doc_urls = response_text.map(extract_doc_links).unwrap_or_default();

        if wp_link.is_none() && doc_urls.is_empty() {
            debug!(%id, "delete_with: no remote resources");
            self.cache.delete(id);
            return Ok(DeletionOutcome::Deleted { remote_errors: vec![] });
        }

        let deleter = self.deleter.as_ref().ok_or(DeletionError::NotConfigured)?;
        let response = deleter
            .delete_resources(&DeleteRequest::new(wp_link, doc_urls))
            .await
            .inspect_err(|e| warn!(%id, error = %e, "Remote deletion failed, keeping term"))?;

        let errors = response.error_messages();
        if errors.iter().any(|e| e.contains(NOT_A_DRAFT)) {
            info!(%id, "Article already published, protecting term");
            self.cache.update(id, TermUpdate::protect());
            return Ok(DeletionOutcome::NowProtected { errors });
        }

        if !errors.is_empty() {
            warn!(%id, ?errors, "Some remote resources could not be deleted");
        }
        self.cache.delete(id);
        info!(%id, "Term deleted");
        Ok(DeletionOutcome::Deleted { remote_errors: errors })
    }
}
