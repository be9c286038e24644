//! Asynchronous chess analysis service.
//!
//! Games are read from a [`games::GameRepository`], replayed, evaluated
//! position by position through a bounded [`engine::EnginePool`], turned into
//! metrics by the `analysis` crate and finally annotated with feedback. Work is
//! tracked as tasks in a [`tasks::TaskStore`] and driven by the
//! [`pipeline::AnalysisManager`].

pub mod api;
pub mod config;
pub mod error;
pub mod feedback;
pub mod games;
pub mod pipeline;
pub mod retry;
pub mod tasks;

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current unix timestamp in seconds.
pub fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
