//! Background generation of pending terms
//!
//! Provides:
//! - TaskRunner: event-driven plus polling pickup of pending terms
//! - process_term: one streaming or blocking engine run reduced into the cache
//! - InFlight: per-id guard against duplicate concurrent runs

mod in_flight;
mod manager;
mod process;

pub use in_flight::{InFlight, InFlightGuard};
pub use manager::{TaskRunner, TaskRunnerConfig};
pub use process::{TaskOutcome, process_term};
