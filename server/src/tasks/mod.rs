mod store;
mod types;

pub use store::{CancelOutcome, Submission, TaskStore, TransitionError};
pub use types::*;

#[cfg(test)]
pub(crate) use store::tests;
