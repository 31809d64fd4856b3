//! History kept in the local kv store
//!
//! Used when no history webhook is configured. The whole list lives under a
//! single key, newest first.

use std::sync::Arc;

use async_trait::async_trait;
use kvstore::KvStore;
use tracing::debug;

use super::{HistoryError, HistoryStore};
use crate::domain::{Term, TermUpdate};

/// Key holding the serialized term list
pub const HISTORY_KEY: &str = "ux_glossary_history";

pub struct LocalHistoryStore {
    kv: Arc<KvStore>,
}

impl LocalHistoryStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn load(&self) -> Result<Vec<Term>, HistoryError> {
        Ok(self.kv.read::<Vec<Term>>(HISTORY_KEY)?.unwrap_or_default())
    }

    /// Change the stored list under the kv lock; `f` reports whether it changed
    fn modify(&self, f: impl FnOnce(&mut Vec<Term>) -> bool) -> Result<(), HistoryError> {
        self.kv.update(HISTORY_KEY, Vec::new(), f)?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for LocalHistoryStore {
    async fn fetch_all(&self) -> Result<Vec<Term>, HistoryError> {
        debug!("LocalHistoryStore::fetch_all: called");
        self.load()
    }

    async fn save(&self, term: &Term) -> Result<(), HistoryError> {
        debug!(id = %term.id, "LocalHistoryStore::save: called");
        self.modify(|terms| {
            terms.retain(|t| t.id != term.id);
            terms.insert(0, term.clone());
            true
        })
    }

    async fn update(&self, id: &str, update: &TermUpdate) -> Result<(), HistoryError> {
        debug!(%id, "LocalHistoryStore::update: called");
        self.modify(|terms| match terms.iter_mut().find(|t| t.id == id) {
            Some(term) => !term.apply(update).is_empty(),
            None => {
                debug!(%id, "LocalHistoryStore::update: id not stored");
                false
            }
        })
    }

    async fn delete(&self, id: &str) -> Result<(), HistoryError> {
        debug!(%id, "LocalHistoryStore::delete: called");
        self.modify(|terms| {
            let before = terms.len();
            terms.retain(|t| t.id != id);
            terms.len() != before
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TermStatus;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalHistoryStore) {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::open(dir.path()).unwrap());
        (dir, LocalHistoryStore::new(kv))
    }

    #[tokio::test]
    async fn test_save_update_delete() {
        let (_dir, store) = store();
        assert!(store.fetch_all().await.unwrap().is_empty());

        store.save(&Term::with_id("a", "First")).await.unwrap();
        store.save(&Term::with_id("b", "Second")).await.unwrap();
        let ids: Vec<_> = store.fetch_all().await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["b", "a"]);

        store.update("a", &TermUpdate::failed("boom")).await.unwrap();
        let terms = store.fetch_all().await.unwrap();
        assert_eq!(terms[1].status, TermStatus::Error);

        store.delete("b").await.unwrap();
        let terms = store.fetch_all().await.unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].id, "a");
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_noop() {
        let (_dir, store) = store();
        store.update("missing", &TermUpdate::protect()).await.unwrap();
        assert!(store.fetch_all().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_saves_from_two_processes_are_kept() {
        let dir = TempDir::new().unwrap();
        let first = Arc::new(LocalHistoryStore::new(Arc::new(KvStore::open(dir.path()).unwrap())));
        let second = Arc::new(LocalHistoryStore::new(Arc::new(KvStore::open(dir.path()).unwrap())));

        let tasks: Vec<_> = [("x", first), ("y", second.clone())]
            .into_iter()
            .map(|(prefix, store)| {
                tokio::spawn(async move {
                    for i in 0..50 {
                        store.save(&Term::with_id(format!("{}-{}", prefix, i), "Topic")).await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(second.fetch_all().await.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_saving_same_id_replaces() {
        let (_dir, store) = store();
        store.save(&Term::with_id("a", "Old")).await.unwrap();
        store.save(&Term::with_id("a", "New")).await.unwrap();
        let terms = store.fetch_all().await.unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].topic, "New");
    }
}
