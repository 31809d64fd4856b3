//! HistoryCache - optimistic in-memory term list mirrored to a HistoryStore
//!
//! Reads and mutations are synchronous against the in-memory list. Each
//! mutation is queued to a single mirror actor, so remote calls go out in
//! mutation order and never block the caller.

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{HistoryError, HistoryStore};
use crate::domain::{Term, TermUpdate};

/// How long a fetched list satisfies non-forced refetches
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Change notifications for cache consumers
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    /// A term was added; `pending` tells the runner whether to pick it up
    Added { id: String, pending: bool },
    /// A partial update took effect; carries only the applied fields
    Updated { id: String, update: TermUpdate },
    Deleted { id: String },
    /// The list was replaced from the store
    Refetched { count: usize },
}

#[derive(Debug)]
enum MirrorCommand {
    Save(Term),
    Update { id: String, update: TermUpdate },
    Delete(String),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct CacheState {
    terms: Vec<Term>,
    fetched_at: Option<Instant>,
    /// Ids whose queued save the store has not seen yet
    saving: HashSet<String>,
    /// Ids whose queued delete the store has not seen yet
    deleting: HashSet<String>,
}

struct Inner {
    state: RwLock<CacheState>,
    store: Arc<dyn HistoryStore>,
    ttl: Duration,
    mirror_tx: mpsc::UnboundedSender<MirrorCommand>,
    event_tx: broadcast::Sender<HistoryEvent>,
}

/// Handle to the process-wide history cache
///
/// Construct once with [`HistoryCache::spawn`] and clone the handle; clones
/// share the same list and mirror queue.
#[derive(Clone)]
pub struct HistoryCache {
    inner: Arc<Inner>,
}

impl HistoryCache {
    /// Create the cache and spawn its mirror actor
    pub fn spawn(store: Arc<dyn HistoryStore>, ttl: Duration) -> Self {
        debug!(ttl_secs = %ttl.as_secs(), "spawn: called");
        let (mirror_tx, mirror_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(256);

        let inner = Arc::new(Inner {
            state: RwLock::new(CacheState::default()),
            store,
            ttl,
            mirror_tx,
            event_tx,
        });

        tokio::spawn(mirror_loop(Arc::downgrade(&inner), mirror_rx));
        info!("HistoryCache spawned");

        Self { inner }
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Current list, newest first
    pub fn list(&self) -> Vec<Term> {
        self.inner.read().terms.clone()
    }

    pub fn get(&self, id: &str) -> Option<Term> {
        self.inner.read().terms.iter().find(|t| t.id == id).cloned()
    }

    /// Terms still waiting for generation
    pub fn pending(&self) -> Vec<Term> {
        self.inner.read().terms.iter().filter(|t| t.is_pending()).cloned().collect()
    }

    /// Insert at the front and queue a remote save
    pub fn add(&self, term: Term) -> Vec<Term> {
        debug!(id = %term.id, topic = %term.topic, "add: called");
        let event = HistoryEvent::Added {
            id: term.id.clone(),
            pending: term.is_pending(),
        };

        let list = {
            let mut state = self.inner.write();
            state.terms.retain(|t| t.id != term.id);
            state.terms.insert(0, term.clone());
            state.saving.insert(term.id.clone());
            state.deleting.remove(&term.id);
            state.terms.clone()
        };

        self.inner.mirror(MirrorCommand::Save(term));
        self.inner.emit(event);
        list
    }

    /// Apply a partial update; returns false for an unknown id
    pub fn update(&self, id: &str, update: TermUpdate) -> bool {
        debug!(%id, "update: called");
        let applied = {
            let mut state = self.inner.write();
            match state.terms.iter_mut().find(|t| t.id == id) {
                Some(term) => term.apply(&update),
                None => {
                    warn!(%id, "Ignoring update for unknown term");
                    return false;
                }
            }
        };

        if !applied.is_empty() {
            self.inner.mirror(MirrorCommand::Update {
                id: id.to_string(),
                update: applied.clone(),
            });
            self.inner.emit(HistoryEvent::Updated {
                id: id.to_string(),
                update: applied,
            });
        }
        true
    }

    /// Remove locally and queue a remote delete; returns false for an unknown id
    pub fn delete(&self, id: &str) -> bool {
        debug!(%id, "delete: called");
        let removed = {
            let mut state = self.inner.write();
            let before = state.terms.len();
            state.terms.retain(|t| t.id != id);
            let removed = state.terms.len() != before;
            if removed {
                state.deleting.insert(id.to_string());
            }
            removed
        };

        if !removed {
            debug!(%id, "delete: unknown id");
            return false;
        }
        self.inner.mirror(MirrorCommand::Delete(id.to_string()));
        self.inner.emit(HistoryEvent::Deleted { id: id.to_string() });
        true
    }

    /// Re-synchronize from the store
    ///
    /// Within the TTL and not forced, returns the cached list without a
    /// remote call. Queued mirror calls are flushed first so the store has
    /// seen every local mutation before it is read back.
    pub async fn refetch(&self, force: bool) -> Result<Vec<Term>, HistoryError> {
        debug!(%force, "refetch: called");
        if !force && let Some(list) = self.inner.fresh_list() {
            debug!("refetch: within TTL, using cached list");
            return Ok(list);
        }
        self.flush().await?;
        self.inner.fetch_and_replace().await
    }

    /// Wait until every mirror call queued so far has been attempted
    pub async fn flush(&self) -> Result<(), HistoryError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .mirror_tx
            .send(MirrorCommand::Flush(tx))
            .map_err(|_| HistoryError::ChannelClosed)?;
        rx.await.map_err(|_| HistoryError::ChannelClosed)
    }

    /// Wait until `id` is terminal or gone from the list
    ///
    /// `on_progress` sees the term after every update to it. The term is
    /// re-checked after any event, so a refetch that drops or finishes it
    /// also ends the wait. Returns the final term, `None` when it is gone.
    pub async fn settled(&self, id: &str, mut on_progress: impl FnMut(&Term)) -> Option<Term> {
        debug!(%id, "settled: called");
        let mut events = self.subscribe();
        loop {
            match self.get(id) {
                None => return None,
                Some(term) if term.status.is_terminal() => return Some(term),
                Some(_) => {}
            }
            match events.recv().await {
                Ok(HistoryEvent::Updated { id: updated, .. }) if updated == id => {
                    if let Some(term) = self.get(id) {
                        on_progress(&term);
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return self.get(id),
            }
        }
    }

    /// Drop the cached list and fetch timestamp
    pub fn reset(&self) {
        debug!("reset: called");
        *self.inner.write() = CacheState::default();
    }
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn mirror(&self, cmd: MirrorCommand) {
        if self.mirror_tx.send(cmd).is_err() {
            warn!("Mirror actor gone; change kept locally only");
        }
    }

    fn emit(&self, event: HistoryEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn fresh_list(&self) -> Option<Vec<Term>> {
        let state = self.read();
        match state.fetched_at {
            Some(at) if at.elapsed() < self.ttl => Some(state.terms.clone()),
            _ => None,
        }
    }

    async fn fetch_and_replace(&self) -> Result<Vec<Term>, HistoryError> {
        let fetched = match self.store.fetch_all().await {
            Ok(terms) => terms,
            Err(e) => {
                warn!(error = %e, "Failed to fetch history");
                return Err(e);
            }
        };

        let list = {
            let mut state = self.write();
            let merged = merge_fetched(&state, fetched);
            state.terms = merged;
            state.fetched_at = Some(Instant::now());
            state.terms.clone()
        };

        debug!(count = %list.len(), "fetch_and_replace: list replaced");
        self.emit(HistoryEvent::Refetched { count: list.len() });
        Ok(list)
    }
}

/// The store wins, except that:
/// - a term already terminal locally stays terminal when the store still
///   reports it pending
/// - a term protected locally stays protected
/// - mutations still queued for the store are kept (unsaved terms stay,
///   deleted terms stay gone)
fn merge_fetched(state: &CacheState, fetched: Vec<Term>) -> Vec<Term> {
    let local = &state.terms;
    let unsaved = local
        .iter()
        .filter(|t| state.saving.contains(&t.id) && !fetched.iter().any(|r| r.id == t.id))
        .cloned()
        .collect::<Vec<_>>();

    let remote = fetched
        .into_iter()
        .filter(|remote| !state.deleting.contains(&remote.id))
        .map(|remote| {
            let Some(mine) = local.iter().find(|t| t.id == remote.id) else {
                return remote;
            };
            let mut merged = if mine.status.is_terminal() && !remote.status.is_terminal() {
                debug!(id = %remote.id, "merge_fetched: keeping local terminal state");
                mine.clone()
            } else {
                remote
            };
            // Protection is one-way; the store losing it does not clear it
            if mine.is_delete_protected() && !merged.is_delete_protected() {
                debug!(id = %merged.id, "merge_fetched: keeping local delete protection");
                merged.is_delete_protected = Some(true);
            }
            merged
        })
        .collect::<Vec<_>>();

    let mut merged = unsaved;
    merged.extend(remote);
    merged
}

async fn mirror_loop(cache: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<MirrorCommand>) {
    debug!("mirror_loop: started");

    while let Some(cmd) = rx.recv().await {
        let Some(inner) = cache.upgrade() else {
            break;
        };

        match cmd {
            MirrorCommand::Save(term) => {
                let result = inner.store.save(&term).await;
                inner.write().saving.remove(&term.id);
                if let Err(e) = result {
                    warn!(id = %term.id, error = %e, "Failed to save history remotely, reconciling");
                    reconcile(&inner).await;
                }
            }
            MirrorCommand::Update { id, update } => {
                // Progress-level drift is tolerated until the next refetch
                if let Err(e) = inner.store.update(&id, &update).await {
                    warn!(%id, error = %e, "Failed to update history remotely");
                }
            }
            MirrorCommand::Delete(id) => {
                let result = inner.store.delete(&id).await;
                inner.write().deleting.remove(&id);
                if let Err(e) = result {
                    warn!(%id, error = %e, "Failed to delete history remotely, reconciling");
                    reconcile(&inner).await;
                }
            }
            MirrorCommand::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }

    debug!("mirror_loop: stopped");
}

async fn reconcile(inner: &Inner) {
    if let Err(e) = inner.fetch_and_replace().await {
        warn!(error = %e, "Reconciling refetch failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TermStatus;
    use crate::history::mock::MockHistoryStore;
    use std::sync::atomic::Ordering;

    fn cache(store: &Arc<MockHistoryStore>, ttl: Duration) -> HistoryCache {
        HistoryCache::spawn(store.clone(), ttl)
    }

    #[tokio::test]
    async fn test_add_is_visible_before_mirror_completes() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        let cache = cache(&store, DEFAULT_CACHE_TTL);

        let list = cache.add(Term::with_id("a", "First"));
        assert_eq!(list[0].id, "a");
        assert!(store.ops().is_empty());

        cache.flush().await.unwrap();
        assert_eq!(store.ops(), vec!["save:a"]);
        assert_eq!(store.terms()[0].id, "a");
    }

    #[tokio::test]
    async fn test_newest_first() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        let cache = cache(&store, DEFAULT_CACHE_TTL);
        cache.add(Term::with_id("a", "First"));
        cache.add(Term::with_id("b", "Second"));
        let ids: Vec<_> = cache.list().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_mirror_calls_follow_mutation_order() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        let cache = cache(&store, DEFAULT_CACHE_TTL);

        cache.add(Term::with_id("a", "Topic"));
        assert!(cache.update("a", TermUpdate::node_started("Research")));
        assert!(cache.delete("a"));
        cache.flush().await.unwrap();

        assert_eq!(store.ops(), vec!["save:a", "update:a", "delete:a"]);
    }

    #[tokio::test]
    async fn test_refetch_within_ttl_skips_remote() {
        let store = Arc::new(MockHistoryStore::new(vec![Term::with_id("r", "Remote")]));
        let cache = cache(&store, Duration::from_secs(60));

        let first = cache.refetch(false).await.unwrap();
        let second = cache.refetch(false).await.unwrap();
        assert_eq!(store.fetch_count(), 1);
        assert_eq!(first, second);

        cache.refetch(true).await.unwrap();
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_ttl_fetches_again() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        let cache = cache(&store, Duration::ZERO);
        cache.refetch(false).await.unwrap();
        cache.refetch(false).await.unwrap();
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_save_reconciles_from_store() {
        let store = Arc::new(MockHistoryStore::new(vec![Term::with_id("r", "Remote")]));
        store.fail_save.store(true, Ordering::SeqCst);
        let cache = cache(&store, DEFAULT_CACHE_TTL);

        let list = cache.add(Term::with_id("a", "Local"));
        assert_eq!(list.len(), 1);

        cache.flush().await.unwrap();
        assert_eq!(store.fetch_count(), 1);
        let ids: Vec<_> = cache.list().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["r"]);
    }

    #[tokio::test]
    async fn test_failed_delete_reconciles_from_store() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        let cache = cache(&store, DEFAULT_CACHE_TTL);
        cache.add(Term::with_id("a", "Topic"));
        cache.flush().await.unwrap();

        store.fail_delete.store(true, Ordering::SeqCst);
        assert!(cache.delete("a"));
        assert!(cache.get("a").is_none());

        cache.flush().await.unwrap();
        assert!(cache.get("a").is_some());
    }

    #[tokio::test]
    async fn test_failed_update_is_not_reconciled() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        let cache = cache(&store, DEFAULT_CACHE_TTL);
        cache.add(Term::with_id("a", "Topic"));

        store.fail_update.store(true, Ordering::SeqCst);
        cache.update("a", TermUpdate::node_started("Research"));
        cache.flush().await.unwrap();

        assert_eq!(store.fetch_count(), 0);
        assert_eq!(cache.get("a").unwrap().current_node.as_deref(), Some("Research"));
    }

    #[tokio::test]
    async fn test_update_unknown_id_returns_false_without_mirror() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        let cache = cache(&store, DEFAULT_CACHE_TTL);
        assert!(!cache.update("missing", TermUpdate::failed("x")));
        assert!(!cache.delete("missing"));
        cache.flush().await.unwrap();
        assert!(store.ops().is_empty());
    }

    #[tokio::test]
    async fn test_refetch_keeps_local_terminal_state() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        let cache = cache(&store, DEFAULT_CACHE_TTL);
        cache.add(Term::with_id("a", "Topic"));
        cache.flush().await.unwrap();

        store.fail_update.store(true, Ordering::SeqCst);
        cache.update("a", TermUpdate::completed("answer", None, "done"));

        let list = cache.refetch(true).await.unwrap();
        assert_eq!(list[0].status, TermStatus::Completed);
    }

    #[tokio::test]
    async fn test_fetch_keeps_mutations_not_yet_mirrored() {
        let store = Arc::new(MockHistoryStore::new(vec![Term::with_id("old", "Old")]));
        let cache = cache(&store, DEFAULT_CACHE_TTL);
        cache.refetch(true).await.unwrap();

        cache.add(Term::with_id("new", "New"));
        cache.delete("old");
        // Read the store without flushing, as a refetch racing the mirror would
        let list = cache.inner.fetch_and_replace().await.unwrap();
        let ids: Vec<_> = list.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["new"]);

        cache.flush().await.unwrap();
        let ids: Vec<_> = cache.refetch(true).await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["new"]);
    }

    #[tokio::test]
    async fn test_refetch_keeps_local_delete_protection() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        let cache = cache(&store, DEFAULT_CACHE_TTL);
        cache.add(Term::with_id("a", "Topic"));
        cache.update("a", TermUpdate::completed("answer", None, "done"));
        cache.flush().await.unwrap();

        store.fail_update.store(true, Ordering::SeqCst);
        cache.update("a", TermUpdate::protect());
        assert!(!store.terms()[0].is_delete_protected());

        let list = cache.refetch(true).await.unwrap();
        assert!(list[0].is_delete_protected());
        assert!(cache.get("a").unwrap().is_delete_protected());
    }

    #[tokio::test]
    async fn test_settled_ends_when_failed_save_drops_term() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        store.fail_save.store(true, Ordering::SeqCst);
        let cache = cache(&store, DEFAULT_CACHE_TTL);
        cache.add(Term::with_id("a", "Topic"));

        let settled = tokio::time::timeout(Duration::from_secs(5), cache.settled("a", |_| {})).await;
        assert_eq!(settled.expect("wait should end"), None);
    }

    #[tokio::test]
    async fn test_settled_reports_progress_then_final_term() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        let cache = cache(&store, DEFAULT_CACHE_TTL);
        cache.add(Term::with_id("a", "Topic"));

        let writer = cache.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            writer.update("a", TermUpdate::node_started("Research"));
            writer.update("a", TermUpdate::completed("answer", None, "done"));
        });

        let mut seen = Vec::new();
        let term = tokio::time::timeout(
            Duration::from_secs(5),
            cache.settled("a", |t| seen.push(t.current_node.clone())),
        )
        .await
        .expect("wait should end")
        .unwrap();
        assert_eq!(term.status, TermStatus::Completed);
        assert!(!seen.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_returned() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        store.fail_fetch.store(true, Ordering::SeqCst);
        let cache = cache(&store, DEFAULT_CACHE_TTL);
        assert!(matches!(cache.refetch(true).await, Err(HistoryError::Status(503))));
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        let cache = cache(&store, DEFAULT_CACHE_TTL);
        let mut rx = cache.subscribe();

        cache.add(Term::with_id("a", "Topic"));
        cache.update("a", TermUpdate::node_started("Research"));
        cache.delete("a");

        assert_eq!(
            rx.recv().await.unwrap(),
            HistoryEvent::Added {
                id: "a".to_string(),
                pending: true
            }
        );
        assert!(matches!(rx.recv().await.unwrap(), HistoryEvent::Updated { .. }));
        assert_eq!(rx.recv().await.unwrap(), HistoryEvent::Deleted { id: "a".to_string() });
    }

    #[tokio::test]
    async fn test_reset_clears_list_and_ttl() {
        let store = Arc::new(MockHistoryStore::new(vec![]));
        let cache = cache(&store, Duration::from_secs(60));
        cache.refetch(false).await.unwrap();
        cache.add(Term::with_id("a", "Topic"));

        cache.reset();
        assert!(cache.list().is_empty());
        cache.refetch(false).await.unwrap();
        assert_eq!(store.fetch_count(), 2);
    }
}
