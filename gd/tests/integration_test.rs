//! Integration tests for glossaryd
//!
//! These tests drive the runner, cache and deletion flow together against a
//! scripted workflow engine and a kv-backed history store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use glossaryd::deletion::{DeleteRequest, DeleteResponse, ResourceDeleter};
use glossaryd::engine::{ByteStream, EngineError, WorkflowClient, WorkflowRequest};
use glossaryd::runner::TaskOutcome;
use glossaryd::stream::{COMPLETED_LABEL, DONE_PREFIX};
use glossaryd::{
    DeletionCoordinator, DeletionError, DeletionOutcome, HistoryCache, HistoryStore, LocalHistoryStore, TaskRunner,
    TaskRunnerConfig, Term, TermStatus,
};
use kvstore::KvStore;
use tempfile::TempDir;
use tokio::sync::mpsc;

const EDIT_URL: &str = "https://uxdaystokyo.com/articles/wp-admin/post.php?post=42&action=edit";
const DOC_URL: &str = "https://docs.google.com/document/d/abc123";

/// Engine that replays the same SSE body, split into fixed-size chunks
struct ScriptedEngine {
    body: Vec<u8>,
    chunk_size: usize,
    requests: Mutex<Vec<WorkflowRequest>>,
}

impl ScriptedEngine {
    fn new(body: &str, chunk_size: usize) -> Self {
        Self {
            body: body.as_bytes().to_vec(),
            chunk_size,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkflowClient for ScriptedEngine {
    async fn open_stream(&self, request: WorkflowRequest) -> Result<ByteStream, EngineError> {
        self.requests.lock().unwrap().push(request);
        let chunks: Vec<Result<Vec<u8>, EngineError>> =
            self.body.chunks(self.chunk_size).map(|c| Ok(c.to_vec())).collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn run_blocking(&self, request: WorkflowRequest) -> Result<String, EngineError> {
        self.requests.lock().unwrap().push(request);
        Err(EngineError::InvalidResponse("blocking mode not scripted".to_string()))
    }
}

/// Deleter that always answers with the same per-resource errors
struct FixedDeleter {
    errors: Vec<&'static str>,
    requests: Mutex<Vec<DeleteRequest>>,
}

#[async_trait]
impl ResourceDeleter for FixedDeleter {
    async fn delete_resources(&self, request: &DeleteRequest) -> Result<DeleteResponse, DeletionError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(DeleteResponse::with_errors(self.errors.iter().copied()))
    }
}

fn sse_body(answer_parts: &[&str]) -> String {
    let mut body = String::new();
    body.push_str("data: {\"event\":\"workflow_started\"}\n\n");
    for title in ["Research", "Outline", "Draft"] {
        body.push_str(&format!(
            "data: {{\"event\":\"node_started\",\"data\":{{\"title\":\"{}\"}}}}\n\n",
            title
        ));
        body.push_str(&format!(
            "data: {{\"event\":\"node_finished\",\"data\":{{\"title\":\"{}\"}}}}\n\n",
            title
        ));
    }
    for part in answer_parts {
        let event = serde_json::json!({ "event": "message", "answer": part });
        body.push_str(&format!("data: {}\n\n", event));
    }
    body.push_str("data: {\"event\":\"workflow_finished\"}\n\n");
    body
}

fn local_cache(dir: &TempDir) -> (Arc<LocalHistoryStore>, HistoryCache) {
    let kv = Arc::new(KvStore::open(dir.path()).expect("Failed to open kv store"));
    let store = Arc::new(LocalHistoryStore::new(kv));
    let cache = HistoryCache::spawn(store.clone(), Duration::ZERO);
    (store, cache)
}

fn runner_config() -> TaskRunnerConfig {
    TaskRunnerConfig {
        poll_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

// =============================================================================
// Runner Tests
// =============================================================================

#[tokio::test]
async fn test_generation_persists_completed_term() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (store, cache) = local_cache(&temp_dir);

    let body = sse_body(&["Published draft: ", EDIT_URL, "\nSource: ", DOC_URL]);
    let engine = Arc::new(ScriptedEngine::new(&body, 7));
    let mut runner = TaskRunner::new(engine.clone(), cache.clone(), runner_config());

    cache.add(Term::with_id("term-1", "Design Sprint"));
    assert!(runner.try_spawn(cache.get("term-1").unwrap()));

    let outcomes = runner.drain().await;
    assert_eq!(
        outcomes,
        vec![TaskOutcome::Completed {
            id: "term-1".to_string(),
            wp_link: Some(EDIT_URL.to_string()),
        }]
    );
    assert!(runner.in_flight().is_empty());

    let term = cache.get("term-1").unwrap();
    assert_eq!(term.status, TermStatus::Completed);
    assert_eq!(term.progress, Some(100));
    assert_eq!(term.completed_nodes, Some(3));
    assert_eq!(term.current_node.as_deref(), Some(COMPLETED_LABEL));
    assert_eq!(
        term.dify_response.as_deref(),
        Some(format!("Published draft: {}\nSource: {}", EDIT_URL, DOC_URL).as_str())
    );

    // The mirror queue carried every update to the durable store
    cache.flush().await.unwrap();
    let stored = store.fetch_all().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, TermStatus::Completed);
    assert_eq!(stored[0].wp_link.as_deref(), Some(EDIT_URL));
    assert_eq!(engine.request_count(), 1);
}

#[tokio::test]
async fn test_malformed_lines_do_not_break_generation() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (_store, cache) = local_cache(&temp_dir);

    let mut body = String::from(": keep-alive\n\ndata: {not json\n\nevent: ping\n\n");
    body.push_str(&sse_body(&["ok"]));
    let engine = Arc::new(ScriptedEngine::new(&body, 3));
    let mut runner = TaskRunner::new(engine, cache.clone(), runner_config());

    cache.add(Term::with_id("term-2", "Affordance"));
    runner.try_spawn(cache.get("term-2").unwrap());
    runner.drain().await;

    let term = cache.get("term-2").unwrap();
    assert_eq!(term.status, TermStatus::Completed);
    assert_eq!(term.completed_nodes, Some(3));
    assert_eq!(term.dify_response.as_deref(), Some("ok"));
    assert_eq!(term.wp_link, None);
}

#[tokio::test]
async fn test_progress_label_before_completion() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (_store, cache) = local_cache(&temp_dir);

    // Stream ends without an answer event; the run still completes
    let body = "data: {\"event\":\"node_finished\",\"data\":{\"title\":\"Research\"}}\n\n";
    let engine = Arc::new(ScriptedEngine::new(body, 16));
    let mut events = cache.subscribe();
    let mut runner = TaskRunner::new(engine, cache.clone(), runner_config());

    cache.add(Term::with_id("term-3", "Heuristic"));
    runner.try_spawn(cache.get("term-3").unwrap());
    runner.drain().await;

    let mut labels = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let glossaryd::HistoryEvent::Updated { update, .. } = event
            && let Some(label) = update.current_node
        {
            labels.push(label);
        }
    }
    assert_eq!(
        labels,
        vec![format!("{}Research", DONE_PREFIX), COMPLETED_LABEL.to_string()]
    );
    assert_eq!(cache.get("term-3").unwrap().status, TermStatus::Completed);
}

#[tokio::test]
async fn test_run_loop_picks_up_submitted_term() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (_store, cache) = local_cache(&temp_dir);

    let engine = Arc::new(ScriptedEngine::new(&sse_body(&["done"]), 32));
    let mut runner = TaskRunner::new(engine.clone(), cache.clone(), runner_config());

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

    // Give the runner time to subscribe
    tokio::time::sleep(Duration::from_millis(50)).await;
    cache.add(Term::with_id("term-4", "Card Sorting"));

    let completed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if cache.get("term-4").is_some_and(|t| t.status == TermStatus::Completed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(completed.is_ok(), "Term should complete");

    shutdown_tx.send(()).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(result.is_ok(), "Runner should shut down gracefully");
    assert_eq!(engine.request_count(), 1, "Each term runs exactly once");
}

// =============================================================================
// Deletion Tests
// =============================================================================

async fn generated_cache(dir: &TempDir) -> (Arc<LocalHistoryStore>, HistoryCache) {
    let (store, cache) = local_cache(dir);
    let engine = Arc::new(ScriptedEngine::new(&sse_body(&[EDIT_URL, " ", DOC_URL]), 64));
    let mut runner = TaskRunner::new(engine, cache.clone(), runner_config());
    cache.add(Term::with_id("term-5", "Persona"));
    runner.try_spawn(cache.get("term-5").unwrap());
    runner.drain().await;
    cache.flush().await.unwrap();
    (store, cache)
}

#[tokio::test]
async fn test_published_article_becomes_protected() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (store, cache) = generated_cache(&temp_dir).await;

    let deleter = Arc::new(FixedDeleter {
        errors: vec!["Post 42 is not a draft"],
        requests: Mutex::new(Vec::new()),
    });
    let coordinator = DeletionCoordinator::new(cache.clone(), Some(deleter.clone() as Arc<dyn ResourceDeleter>));

    let outcome = coordinator.delete("term-5").await.unwrap();
    assert!(matches!(outcome, DeletionOutcome::NowProtected { .. }));

    let sent = deleter.requests.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].wp_link.as_deref(), Some(EDIT_URL));
    assert_eq!(sent[0].doc_url, vec![DOC_URL.to_string()]);

    // Protection is persisted and a second attempt never reaches the webhook
    cache.flush().await.unwrap();
    let stored = store.fetch_all().await.unwrap();
    assert!(stored[0].is_delete_protected());
    assert_eq!(coordinator.delete("term-5").await.unwrap(), DeletionOutcome::Protected);
    assert_eq!(deleter.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_tolerated_errors_remove_term_everywhere() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (store, cache) = generated_cache(&temp_dir).await;

    let deleter = Arc::new(FixedDeleter {
        errors: vec!["Document not found"],
        requests: Mutex::new(Vec::new()),
    });
    let coordinator = DeletionCoordinator::new(cache.clone(), Some(deleter as Arc<dyn ResourceDeleter>));

    let outcome = coordinator.delete("term-5").await.unwrap();
    assert_eq!(
        outcome,
        DeletionOutcome::Deleted {
            remote_errors: vec!["Document not found".to_string()]
        }
    );

    cache.flush().await.unwrap();
    assert!(cache.get("term-5").is_none());
    assert!(store.fetch_all().await.unwrap().is_empty());
}
