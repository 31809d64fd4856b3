//! SSE stream handling
//!
//! Bytes from the engine go through `LineFramer` into `StreamAggregator`,
//! which emits progress updates as nodes run and a `Completion` once the
//! transport closes.

mod aggregator;
mod framer;

pub use aggregator::{
    COMPLETED_LABEL, Completion, DATA_PREFIX, DONE_PREFIX, EXPECTED_TOTAL_NODES, StreamAggregator, progress_for,
};
pub use framer::LineFramer;
