//! WorkflowClient trait definition

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::{EngineError, WorkflowRequest};

/// Raw response body chunks, in arrival order
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, EngineError>> + Send>>;

/// Client for one workflow run per call
///
/// Each request is independent; the engine keeps no conversation state
/// between terms.
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Start a streaming run and hand back the raw SSE body
    ///
    /// Fails before any bytes are returned when the engine rejects the
    /// request (non-2xx status or transport error).
    async fn open_stream(&self, request: WorkflowRequest) -> Result<ByteStream, EngineError>;

    /// Run the workflow to completion and return only the final answer
    async fn run_blocking(&self, request: WorkflowRequest) -> Result<String, EngineError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::StreamExt;
    use tokio::sync::Notify;
    use tracing::debug;

    /// One scripted engine reply
    pub enum MockReply {
        /// Stream these chunks, then end
        Chunks(Vec<Vec<u8>>),
        /// Stream these chunks, then fail with a network-style error
        ChunksThenFail(Vec<Vec<u8>>, String),
        /// Wait for the gate, then stream these chunks
        Gated(Vec<Vec<u8>>, Arc<Notify>),
        /// Reject the request with an HTTP status
        Status(u16, String),
        /// Blocking-mode answer
        Answer(String),
    }

    impl MockReply {
        /// SSE body made of `data: ` lines for each JSON event
        pub fn events(events: &[&str]) -> Self {
            let body: String = events.iter().map(|e| format!("data: {}\n\n", e)).collect();
            Self::Chunks(vec![body.into_bytes()])
        }
    }

    /// Mock workflow client for unit tests
    pub struct MockWorkflowClient {
        replies: Mutex<VecDeque<MockReply>>,
        requests: Mutex<Vec<WorkflowRequest>>,
        call_count: AtomicUsize,
    }

    impl MockWorkflowClient {
        pub fn new(replies: Vec<MockReply>) -> Self {
            debug!(reply_count = %replies.len(), "MockWorkflowClient::new: called");
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<WorkflowRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn next(&self, request: WorkflowRequest) -> Option<MockReply> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            self.replies.lock().unwrap().pop_front()
        }
    }

    fn chunk_stream(chunks: Vec<Vec<u8>>) -> impl Stream<Item = Result<Vec<u8>, EngineError>> + Send {
        futures::stream::iter(chunks.into_iter().map(Ok))
    }

    #[async_trait]
    impl WorkflowClient for MockWorkflowClient {
        async fn open_stream(&self, request: WorkflowRequest) -> Result<ByteStream, EngineError> {
            debug!("MockWorkflowClient::open_stream: called");
            match self.next(request) {
                Some(MockReply::Chunks(chunks)) => Ok(Box::pin(chunk_stream(chunks))),
                Some(MockReply::ChunksThenFail(chunks, message)) => {
                    let tail = futures::stream::once(async move { Err(EngineError::InvalidResponse(message)) });
                    Ok(Box::pin(chunk_stream(chunks).chain(tail)))
                }
                Some(MockReply::Gated(chunks, gate)) => {
                    let opened = futures::stream::once(async move { gate.notified().await })
                        .map(move |_| chunk_stream(chunks.clone()))
                        .flatten();
                    Ok(Box::pin(opened))
                }
                Some(MockReply::Status(status, message)) => Err(EngineError::Api { status, message }),
                Some(MockReply::Answer(_)) | None => {
                    Err(EngineError::InvalidResponse("No more mock replies".to_string()))
                }
            }
        }

        async fn run_blocking(&self, request: WorkflowRequest) -> Result<String, EngineError> {
            debug!("MockWorkflowClient::run_blocking: called");
            match self.next(request) {
                Some(MockReply::Answer(answer)) => Ok(answer),
                Some(MockReply::Status(status, message)) => Err(EngineError::Api { status, message }),
                _ => Err(EngineError::InvalidResponse("No more mock replies".to_string())),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::Term;
        use crate::engine::ResponseMode;

        fn request() -> WorkflowRequest {
            WorkflowRequest::for_term(&Term::with_id("t", "Topic"), ResponseMode::Streaming, "u")
        }

        #[tokio::test]
        async fn test_mock_streams_scripted_chunks() {
            let client = MockWorkflowClient::new(vec![MockReply::Chunks(vec![b"ab".to_vec(), b"c".to_vec()])]);
            let stream = client.open_stream(request()).await.unwrap();
            let chunks: Vec<_> = stream.map(|c| c.unwrap()).collect().await;
            assert_eq!(chunks, vec![b"ab".to_vec(), b"c".to_vec()]);
            assert_eq!(client.call_count(), 1);
            assert_eq!(client.requests()[0].inputs.topic, "Topic");
        }

        #[tokio::test]
        async fn test_mock_errors_when_exhausted() {
            let client = MockWorkflowClient::new(vec![]);
            assert!(client.open_stream(request()).await.is_err());
            assert!(client.run_blocking(request()).await.is_err());
        }
    }
}
