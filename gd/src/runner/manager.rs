//! TaskRunner - background loop that generates every pending term
//!
//! The TaskRunner is responsible for:
//! - Picking up pending terms as soon as they are added
//! - Falling back to periodic refetch-and-poll for terms added elsewhere
//! - Running at most one generation per term id at a time
//! - Bounding concurrent generations via semaphore

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{InFlight, TaskOutcome, process_term};
use crate::config::Config;
use crate::domain::Term;
use crate::engine::{ResponseMode, WorkflowClient};
use crate::history::{HistoryCache, HistoryEvent};

/// Configuration for the TaskRunner
#[derive(Debug, Clone)]
pub struct TaskRunnerConfig {
    /// Maximum terms generating at once
    pub max_concurrent: usize,

    /// Fallback polling interval; event-driven pickup handles new local terms
    pub poll_interval: Duration,

    pub response_mode: ResponseMode,

    /// End-user identifier sent to the engine
    pub user: String,
}

impl Default for TaskRunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            poll_interval: Duration::from_secs(10),
            response_mode: ResponseMode::Streaming,
            user: "ux-glossary-web-user".to_string(),
        }
    }
}

impl From<&Config> for TaskRunnerConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrent: config.runner.max_concurrent.max(1),
            poll_interval: Duration::from_secs(config.runner.poll_interval_secs.max(1)),
            response_mode: config.engine.response_mode,
            user: config.engine.user.clone(),
        }
    }
}

pub struct TaskRunner {
    client: Arc<dyn WorkflowClient>,
    cache: HistoryCache,
    config: TaskRunnerConfig,
    in_flight: InFlight,
    semaphore: Arc<Semaphore>,
    tasks: HashMap<String, JoinHandle<TaskOutcome>>,
}

impl TaskRunner {
    pub fn new(client: Arc<dyn WorkflowClient>, cache: HistoryCache, config: TaskRunnerConfig) -> Self {
        debug!(?config, "TaskRunner::new: called");
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            client,
            cache,
            config,
            in_flight: InFlight::new(),
            semaphore,
            tasks: HashMap::new(),
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Run until a shutdown signal arrives
    pub async fn run(&mut self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        debug!("run: called");
        info!("TaskRunner starting");

        // Subscribe before the first poll so no Added event is missed
        let mut events = self.cache.subscribe();

        if let Err(e) = self.cache.refetch(false).await {
            warn!(error = %e, "Initial history fetch failed, using cached list");
        }
        self.poll_and_spawn();

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => {
                    self.handle_history_event(event);
                }

                _ = interval.tick() => {
                    self.handle_poll_tick().await;
                }

                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown_all().await;
        if let Err(e) = self.cache.flush().await {
            warn!(error = %e, "Failed to flush history mirror on shutdown");
        }
        info!("TaskRunner stopped");
        Ok(())
    }

    fn handle_history_event(&mut self, event: Result<HistoryEvent, RecvError>) {
        match event {
            Ok(HistoryEvent::Added { id, pending: true }) => {
                debug!(%id, "handle_history_event: pending term added");
                if let Some(term) = self.cache.get(&id) {
                    self.try_spawn(term);
                }
            }
            Ok(HistoryEvent::Refetched { count }) => {
                debug!(%count, "handle_history_event: list refetched");
                self.poll_and_spawn();
            }
            Ok(_) => {}
            Err(RecvError::Closed) => {
                warn!("handle_history_event: channel closed, falling back to polling only");
            }
            Err(RecvError::Lagged(n)) => {
                debug!(n, "handle_history_event: lagged behind, doing full poll");
                self.poll_and_spawn();
            }
        }
    }

    async fn handle_poll_tick(&mut self) {
        debug!("handle_poll_tick: tick");
        if let Err(e) = self.cache.refetch(false).await {
            warn!(error = %e, "Periodic history refetch failed");
        }
        self.poll_and_spawn();
        self.reap_completed_tasks().await;
    }

    /// Spawn a generation for every pending term not already in flight
    ///
    /// Returns how many were spawned.
    pub fn poll_and_spawn(&mut self) -> usize {
        let pending = self.cache.pending();
        debug!(pending_count = pending.len(), "poll_and_spawn: called");
        pending.into_iter().filter(|term| self.try_spawn(term.clone())).count()
    }

    /// Start generating `term` unless it is terminal or already in flight
    pub fn try_spawn(&mut self, term: Term) -> bool {
        if !term.is_pending() {
            debug!(id = %term.id, status = %term.status, "try_spawn: not pending");
            return false;
        }
        let Some(guard) = self.in_flight.try_acquire(&term.id) else {
            return false;
        };

        info!(id = %term.id, topic = %term.topic, "Starting generation");
        let client = self.client.clone();
        let cache = self.cache.clone();
        let semaphore = self.semaphore.clone();
        let mode = self.config.response_mode;
        let user = self.config.user.clone();
        let id = term.id.clone();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            // The semaphore is never closed
            let _permit = semaphore.acquire_owned().await.ok();
            process_term(client.as_ref(), &cache, &term, mode, &user).await
        });
        self.tasks.insert(id, handle);
        true
    }

    /// Collect finished tasks, logging their outcome
    pub async fn reap_completed_tasks(&mut self) -> Vec<TaskOutcome> {
        let finished: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        debug!(finished_count = finished.len(), "reap_completed_tasks: called");

        let mut outcomes = Vec::new();
        for id in finished {
            if let Some(handle) = self.tasks.remove(&id)
                && let Some(outcome) = join_task(&id, handle).await
            {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Wait for every spawned task to finish
    pub async fn drain(&mut self) -> Vec<TaskOutcome> {
        debug!(task_count = self.tasks.len(), "drain: called");
        let mut outcomes = Vec::new();
        for (id, handle) in std::mem::take(&mut self.tasks) {
            if let Some(outcome) = join_task(&id, handle).await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Abort running generations; their terms stay pending for the next run
    async fn shutdown_all(&mut self) {
        let running = self.tasks.values().filter(|h| !h.is_finished()).count();
        if running > 0 {
            info!(running, "Aborting in-flight generations");
        }
        for handle in self.tasks.values() {
            handle.abort();
        }
        self.drain().await;
    }
}

async fn join_task(id: &str, handle: JoinHandle<TaskOutcome>) -> Option<TaskOutcome> {
    match handle.await {
        Ok(outcome) => {
            debug!(%id, ?outcome, "join_task: finished");
            Some(outcome)
        }
        Err(e) if e.is_cancelled() => {
            debug!(%id, "join_task: cancelled");
            None
        }
        Err(e) => {
            error!(%id, error = %e, "Generation task panicked");
            None
        }
    }
}
