//! One term's generation run

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::domain::{Term, TermUpdate};
use crate::engine::{EngineError, ResponseMode, WorkflowClient, WorkflowRequest};
use crate::history::HistoryCache;
use crate::stream::{Completion, StreamAggregator};

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed { id: String, wp_link: Option<String> },
    Failed { id: String, message: String },
}

impl TaskOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Completed { id, .. } | Self::Failed { id, .. } => id,
        }
    }
}

/// Generate `term` and write progress plus one terminal update into `cache`
///
/// Updates for a term deleted mid-run are dropped by the cache; the engine
/// call itself runs to the end.
pub async fn process_term(
    client: &dyn WorkflowClient,
    cache: &HistoryCache,
    term: &Term,
    mode: ResponseMode,
    user: &str,
) -> TaskOutcome {
    debug!(id = %term.id, topic = %term.topic, ?mode, "process_term: called");
    let request = WorkflowRequest::for_term(term, mode, user);

    let result = match mode {
        ResponseMode::Streaming => run_streaming(client, cache, &term.id, request).await,
        ResponseMode::Blocking => client.run_blocking(request).await.map(Completion::from_answer),
    };

    match result {
        Ok(completion) => {
            let wp_link = completion.wp_link.clone();
            info!(id = %term.id, has_link = %wp_link.is_some(), "Term generated");
            cache.update(&term.id, completion.into_update());
            TaskOutcome::Completed {
                id: term.id.clone(),
                wp_link,
            }
        }
        Err(e) => {
            let message = e.to_string();
            warn!(id = %term.id, error = %message, "Term generation failed");
            cache.update(&term.id, TermUpdate::failed(message.clone()));
            TaskOutcome::Failed {
                id: term.id.clone(),
                message,
            }
        }
    }
}

async fn run_streaming(
    client: &dyn WorkflowClient,
    cache: &HistoryCache,
    id: &str,
    request: WorkflowRequest,
) -> Result<Completion, EngineError> {
    let mut stream = client.open_stream(request).await?;
    let mut aggregator = StreamAggregator::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for update in aggregator.push_chunk(&chunk) {
            cache.update(id, update);
        }
    }

    Ok(aggregator.finish())
}
