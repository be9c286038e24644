//! Pure move classification, game metrics and statistical feedback.
//!
//! Nothing in this crate performs I/O; the server feeds it engine scores and
//! stores what it returns.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod error;
pub mod feedback;
pub mod metrics;
pub mod phases;
pub mod types;

pub use aggregate::{aggregate_games, BatchAggregate, PhaseAggregate};
pub use classify::{classify_move, EvalZone, PlyEvaluation};
pub use config::MetricsConfig;
pub use error::InsufficientDataError;
pub use feedback::{statistical_narrative, FeedbackPayload, Narrative, PhaseNarrative};
pub use metrics::{compute_accuracy, compute_game_metrics};
pub use phases::assign_phases;
pub use types::*;

pub use chess::AnalysisScore;
