pub mod pool;
pub mod stockfish;
pub mod uci;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use pool::{EngineLease, EnginePool, PoolStats};
pub use stockfish::{EngineConfig, StockfishEngine, StockfishFactory};
pub use uci::{UciError, UciMessage};

use chess::AnalysisScore;
use std::future::Future;
use std::time::Duration;

/// How long the engine may search a single position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchLimit {
    Depth(u8),
    MoveTime(u64),
}

impl SearchLimit {
    /// The UCI `go` command for this limit.
    pub fn go_command(&self) -> String {
        match self {
            Self::Depth(depth) => format!("go depth {}", depth),
            Self::MoveTime(ms) => format!("go movetime {}", ms),
        }
    }

    /// Shallower search used after a timed-out attempt. Depth never drops below 1;
    /// move-time limits are halved with a floor of 50 ms.
    pub fn reduced(&self, depth_step: u8) -> Self {
        match self {
            Self::Depth(depth) => Self::Depth(depth.saturating_sub(depth_step).max(1)),
            Self::MoveTime(ms) => Self::MoveTime((ms / 2).max(50)),
        }
    }
}

/// Result of searching one position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionEvaluation {
    /// Score from the side-to-move's point of view.
    pub score: AnalysisScore,
    /// Best move in UCI notation; `None` when the position has no legal moves.
    pub best_move: Option<String>,
    pub principal_variation: Vec<String>,
    pub depth: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No engine became available within {0:?}")]
    CheckoutTimeout(Duration),
    #[error("Engine checkout cancelled")]
    Cancelled,
    #[error("Evaluation exceeded {0:?}")]
    EvaluationTimeout(Duration),
    #[error("Engine process crashed: {0}")]
    Crashed(String),
    #[error("Malformed engine output: {0}")]
    MalformedOutput(String),
    #[error("Engine handle was retired")]
    Retired,
    #[error("Failed to start engine: {0}")]
    Spawn(String),
    #[error("Engine pool is shut down")]
    ShutDown,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether retrying the same evaluation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CheckoutTimeout(_) | Self::EvaluationTimeout(_) | Self::Crashed(_) | Self::Retired
        )
    }
}

impl From<UciError> for EngineError {
    fn from(err: UciError) -> Self {
        match err {
            UciError::Io(e) => Self::Io(e),
            other => Self::MalformedOutput(other.to_string()),
        }
    }
}

/// One engine process (or stand-in) able to evaluate positions.
pub trait Evaluator: Send + 'static {
    fn evaluate(
        &mut self,
        fen: &str,
        limit: SearchLimit,
    ) -> impl Future<Output = Result<PositionEvaluation, EngineError>> + Send;

    /// Whether the adapter can still serve evaluations.
    fn is_healthy(&mut self) -> impl Future<Output = bool> + Send;

    fn shutdown(self) -> impl Future<Output = ()> + Send;
}

/// Creates fresh adapters for the pool.
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: Evaluator;

    fn create(&self) -> impl Future<Output = Result<Self::Engine, EngineError>> + Send;
}
