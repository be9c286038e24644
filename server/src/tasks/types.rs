use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use analysis::{BatchAggregate, FeedbackPayload, GameMetrics, MoveEvaluation};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, TaskError};

/// Lifecycle of an analysis task.
///
/// `Pending → Started → InProgress → Succeeded | Failed`. Pending, Started
/// and InProgress may also go straight to Failed. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskStatus {
    Pending,
    Started,
    InProgress,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Started => "Started",
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }

    /// Whether the worker may move a task from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::{Failed, InProgress, Pending, Started, Succeeded};
        matches!(
            (self, next),
            (Pending, Started)
                | (Started, InProgress)
                | (InProgress, Succeeded)
                | (Pending | Started | InProgress, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown task status: {0:?}")]
pub struct ParseStatusError(String);

/// Accepts any casing and `_`, `-` or space separators (`IN_PROGRESS`, `in-progress`).
impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "inprogress" => Ok(Self::InProgress),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Moves analyzed so far out of the game's total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.current as f64 / self.total as f64 * 100.0).min(100.0)
        }
    }
}

/// Output of a successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub metrics: GameMetrics,
    pub moves: Vec<MoveEvaluation>,
    pub feedback: FeedbackPayload,
}

/// One game analysis tracked by the task store.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisTask {
    pub task_id: Uuid,
    pub requester: String,
    pub game_id: String,
    pub batch_id: Option<Uuid>,
    pub status: TaskStatus,
    pub progress: Progress,
    pub result: Option<Arc<TaskResult>>,
    pub error: Option<TaskError>,
    pub retry_count: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl AnalysisTask {
    /// Short human-readable description of where the task stands.
    pub fn message(&self) -> String {
        match self.status {
            TaskStatus::Pending => "Waiting for a worker".to_string(),
            TaskStatus::Started => "Preparing game".to_string(),
            TaskStatus::InProgress => format!(
                "Analyzing move {} of {}",
                (self.progress.current + 1).min(self.progress.total),
                self.progress.total
            ),
            TaskStatus::Succeeded => "Analysis complete".to_string(),
            TaskStatus::Failed => match &self.error {
                Some(error) => error.message.clone(),
                None => "Analysis failed".to_string(),
            },
        }
    }
}

/// Child counts of a batch. `completed + failed + in_progress == total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub in_progress: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchChild {
    pub game_id: String,
    pub task_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedGame {
    pub game_id: String,
    pub task_id: Uuid,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedGame {
    pub game_id: String,
    pub task_id: Uuid,
    pub code: ErrorCode,
    pub message: String,
}

/// A group of analysis tasks submitted together.
#[derive(Debug, Clone, Serialize)]
pub struct BatchTask {
    pub batch_id: Uuid,
    pub requester: String,
    /// InProgress until every child is terminal, then Succeeded.
    pub status: TaskStatus,
    pub children: Vec<BatchChild>,
    pub counts: BatchCounts,
    pub completed_games: Vec<CompletedGame>,
    pub failed_games: Vec<FailedGame>,
    /// Combined metrics over Succeeded children only.
    pub aggregate: Option<BatchAggregate>,
    pub estimated_time_seconds: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl BatchTask {
    pub fn new(
        batch_id: Uuid,
        requester: &str,
        children: Vec<BatchChild>,
        estimated_time_seconds: u64,
    ) -> Self {
        let now = crate::now_timestamp();
        let total = children.len() as u32;
        Self {
            batch_id,
            requester: requester.to_string(),
            status: if total == 0 {
                TaskStatus::Succeeded
            } else {
                TaskStatus::InProgress
            },
            children,
            counts: BatchCounts {
                total,
                in_progress: total,
                ..BatchCounts::default()
            },
            completed_games: Vec::new(),
            failed_games: Vec::new(),
            aggregate: None,
            estimated_time_seconds,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn progress_percent(&self) -> f64 {
        Progress {
            current: self.counts.completed + self.counts.failed,
            total: self.counts.total,
        }
        .percent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        for raw in ["inprogress", "IN_PROGRESS", "in-progress", "InProgress", "in progress"] {
            assert_eq!(raw.parse::<TaskStatus>().unwrap(), TaskStatus::InProgress, "{}", raw);
        }
        assert_eq!("SUCCEEDED".parse::<TaskStatus>().unwrap(), TaskStatus::Succeeded);
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_status_output_is_canonical() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"InProgress\"");
        let parsed: TaskStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(parsed, TaskStatus::InProgress);
    }

    #[test]
    fn test_allowed_transitions() {
        use TaskStatus::{Failed, InProgress, Pending, Started, Succeeded};
        assert!(Pending.can_transition_to(Started));
        assert!(Pending.can_transition_to(Failed));
        assert!(Started.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Succeeded));
        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Started.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(Progress::default().percent(), 0.0);
        assert_eq!(Progress { current: 5, total: 20 }.percent(), 25.0);
    }

    #[test]
    fn test_empty_batch_is_finished() {
        let batch = BatchTask::new(Uuid::new_v4(), "alice", Vec::new(), 0);
        assert_eq!(batch.status, TaskStatus::Succeeded);
        assert_eq!(batch.counts.total, 0);
    }
}
