use std::fmt;

use engine::EngineError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::games::RepositoryError;

/// Machine-readable reason an analysis task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    GameNotFound,
    InvalidGameData,
    InsufficientData,
    EngineUnavailable,
    EngineTimeout,
    EngineFailure,
    Cancelled,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GameNotFound => "GAME_NOT_FOUND",
            Self::InvalidGameData => "INVALID_GAME_DATA",
            Self::InsufficientData => "INSUFFICIENT_DATA",
            Self::EngineUnavailable => "ENGINE_UNAVAILABLE",
            Self::EngineTimeout => "ENGINE_TIMEOUT",
            Self::EngineFailure => "ENGINE_FAILURE",
            Self::Cancelled => "CANCELLED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal error recorded on a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TaskError {
    pub code: ErrorCode,
    pub message: String,
}

impl TaskError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Analysis was cancelled")
    }
}

impl From<EngineError> for TaskError {
    fn from(err: EngineError) -> Self {
        let code = match &err {
            EngineError::CheckoutTimeout(_) | EngineError::Spawn(_) | EngineError::ShutDown => {
                ErrorCode::EngineUnavailable
            }
            EngineError::EvaluationTimeout(_) => ErrorCode::EngineTimeout,
            EngineError::Cancelled => ErrorCode::Cancelled,
            EngineError::Crashed(_)
            | EngineError::MalformedOutput(_)
            | EngineError::Retired
            | EngineError::Io(_) => ErrorCode::EngineFailure,
        };
        Self::new(code, err.to_string())
    }
}

impl From<RepositoryError> for TaskError {
    fn from(err: RepositoryError) -> Self {
        let code = match &err {
            RepositoryError::Json(_) => ErrorCode::InvalidGameData,
            RepositoryError::InvalidId(_) => ErrorCode::GameNotFound,
            RepositoryError::Io(_) => ErrorCode::Internal,
        };
        Self::new(code, err.to_string())
    }
}

/// Errors returned to callers of the analysis service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Task {0} not found")]
    TaskNotFound(Uuid),
    #[error("Batch {0} not found")]
    BatchNotFound(Uuid),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Analysis queue is full, try again later")]
    Busy,
    #[error("Service is shutting down")]
    ShuttingDown,
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TaskNotFound(_) => "TASK_NOT_FOUND",
            Self::BatchNotFound(_) => "BATCH_NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Busy => "BUSY",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// Whether the same request may succeed if sent again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy | Self::ShuttingDown)
    }
}
