//! Domain types for glossaryd
//!
//! A Term is both the unit of work handed to the workflow engine and the unit
//! of history shown to the user.

mod term;

pub use term::{DEFAULT_SLIDER, MAX_PENDING_PROGRESS, NewTerm, Term, TermError, TermStatus, TermUpdate};
