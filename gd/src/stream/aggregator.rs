//! Reduce a workflow SSE stream to progress updates and one final answer

use tracing::debug;

use super::LineFramer;
use crate::domain::{MAX_PENDING_PROGRESS, TermUpdate};
use crate::engine::{EventKind, WorkflowEvent};
use crate::links;

/// Node count of the deployed workflow graph; progress is relative to it
pub const EXPECTED_TOTAL_NODES: u32 = 25;

/// Prefix marking an SSE data line
pub const DATA_PREFIX: &str = "data: ";

/// Label prefix for a finished node ("done: <title>")
pub const DONE_PREFIX: &str = "完了: ";

/// Current-node label once the whole run finished ("all steps completed")
pub const COMPLETED_LABEL: &str = "すべての処理が完了しました";

/// Percent complete after `completed` node_finished events, capped below 100
pub fn progress_for(completed: u32) -> u8 {
    let percent = (f64::from(completed) / f64::from(EXPECTED_TOTAL_NODES) * 100.0).round();
    percent.min(f64::from(MAX_PENDING_PROGRESS)) as u8
}

/// Result of a fully consumed stream
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// All answer fragments, concatenated in arrival order
    pub answer: String,
    /// First article edit link found in the answer
    pub wp_link: Option<String>,
}

impl Completion {
    pub fn from_answer(answer: String) -> Self {
        let wp_link = links::extract_article_link(&answer);
        Self { answer, wp_link }
    }

    /// The single terminal update for a successful run
    pub fn into_update(self) -> TermUpdate {
        TermUpdate::completed(self.answer, self.wp_link, COMPLETED_LABEL)
    }
}

/// Incremental SSE reducer for one workflow run
#[derive(Debug, Default)]
pub struct StreamAggregator {
    framer: LineFramer,
    completed_nodes: u32,
    answer: String,
    skipped: usize,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw body bytes; returns progress updates for completed lines
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<TermUpdate> {
        self.framer
            .push(chunk)
            .iter()
            .filter_map(|line| self.feed_line(line))
            .collect()
    }

    /// Apply one complete line
    ///
    /// Non-data lines, blank payloads and undecodable JSON are skipped; none
    /// of them end the stream.
    pub fn feed_line(&mut self, line: &str) -> Option<TermUpdate> {
        let payload = line.strip_prefix(DATA_PREFIX)?.trim();
        if payload.is_empty() {
            return None;
        }

        let event: WorkflowEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                self.skipped += 1;
                debug!(error = %e, "feed_line: skipping undecodable event");
                return None;
            }
        };

        match event.kind() {
            EventKind::NodeStarted => event.node_title().map(TermUpdate::node_started),
            EventKind::NodeFinished => {
                self.completed_nodes += 1;
                let label = format!("{}{}", DONE_PREFIX, event.node_title().unwrap_or_default());
                Some(TermUpdate::node_finished(
                    label,
                    self.completed_nodes,
                    progress_for(self.completed_nodes),
                ))
            }
            EventKind::AnswerChunk => {
                if let Some(fragment) = &event.answer {
                    self.answer.push_str(fragment);
                }
                None
            }
            // End of run is detected by the transport closing
            EventKind::Finished | EventKind::Other => None,
        }
    }

    pub fn completed_nodes(&self) -> u32 {
        self.completed_nodes
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Lines that looked like events but did not decode
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Close the stream and produce the final answer
    ///
    /// A trailing line without its newline is not an event and is dropped.
    pub fn finish(mut self) -> Completion {
        if let Some(rest) = self.framer.finish() {
            debug!(bytes = %rest.len(), "finish: dropping unterminated trailing line");
        }
        debug!(
            completed_nodes = %self.completed_nodes,
            answer_len = %self.answer.len(),
            skipped = %self.skipped,
            "finish: called"
        );
        Completion::from_answer(self.answer)
    }
}
