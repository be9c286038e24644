//! In-memory registry of analysis tasks and batches.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use analysis::{aggregate_games, GameMetrics};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::*;
use crate::error::{ErrorCode, TaskError};
use crate::now_timestamp;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Task {0} not found")]
    NotFound(Uuid),
    #[error("Task is {actual}, expected {expected}")]
    Conflict {
        expected: TaskStatus,
        actual: TaskStatus,
    },
    #[error("Transition {from} -> {to} is not allowed")]
    NotAllowed { from: TaskStatus, to: TaskStatus },
}

/// Result of [`TaskStore::create_or_get`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub task: AnalysisTask,
    pub is_existing: bool,
}

/// What a cancel request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task had not started and is now Failed(CANCELLED).
    Cancelled,
    /// The worker will stop at the next position.
    Requested,
    AlreadyFinished(TaskStatus),
}

struct TaskEntry {
    task: AnalysisTask,
    cancel_requested: bool,
    cancel: CancellationToken,
    status_tx: watch::Sender<TaskStatus>,
}

impl TaskEntry {
    fn set_status(&mut self, status: TaskStatus) {
        self.task.status = status;
        self.task.updated_at = now_timestamp();
        self.status_tx.send_replace(status);
        if status.is_terminal() {
            self.cancel.cancel();
        }
    }
}

struct BatchEntry {
    batch: BatchTask,
    settled: HashSet<Uuid>,
    succeeded_metrics: Vec<GameMetrics>,
}

#[derive(Default)]
struct StoreState {
    tasks: HashMap<Uuid, TaskEntry>,
    /// (requester, game_id) → latest task for that pair.
    by_game: HashMap<(String, String), Uuid>,
    batches: HashMap<Uuid, BatchEntry>,
}

/// Concurrent task registry.
///
/// Every task owns a child of the store's root cancellation token, so
/// cancelling the root cancels all running work.
pub struct TaskStore {
    state: RwLock<StoreState>,
    root: CancellationToken,
    reuse_completed_for: Duration,
}

impl TaskStore {
    pub fn new(root: CancellationToken, reuse_completed_for: Duration) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            root,
            reuse_completed_for,
        }
    }

    fn new_entry(&self, requester: &str, game_id: &str, batch_id: Option<Uuid>) -> TaskEntry {
        let now = now_timestamp();
        let (status_tx, _) = watch::channel(TaskStatus::Pending);
        TaskEntry {
            task: AnalysisTask {
                task_id: Uuid::new_v4(),
                requester: requester.to_string(),
                game_id: game_id.to_string(),
                batch_id,
                status: TaskStatus::Pending,
                progress: Progress::default(),
                result: None,
                error: None,
                retry_count: 0,
                created_at: now,
                updated_at: now,
            },
            cancel_requested: false,
            cancel: self.root.child_token(),
            status_tx,
        }
    }

    fn is_reusable(&self, task: &AnalysisTask) -> bool {
        match task.status {
            TaskStatus::Succeeded => {
                !self.reuse_completed_for.is_zero()
                    && now_timestamp().saturating_sub(task.updated_at)
                        <= self.reuse_completed_for.as_secs()
            }
            TaskStatus::Failed => false,
            _ => true,
        }
    }

    /// The task a new submission for `(requester, game_id)` would be folded into.
    pub async fn find_live(&self, requester: &str, game_id: &str) -> Option<AnalysisTask> {
        let state = self.state.read().await;
        let key = (requester.to_string(), game_id.to_string());
        state
            .by_game
            .get(&key)
            .and_then(|id| state.tasks.get(id))
            .map(|entry| &entry.task)
            .filter(|task| self.is_reusable(task))
            .cloned()
    }

    /// Return the live task for `(requester, game_id)` or create a Pending one.
    ///
    /// A Succeeded task younger than the reuse window also counts as live.
    pub async fn create_or_get(
        &self,
        requester: &str,
        game_id: &str,
        batch_id: Option<Uuid>,
    ) -> Submission {
        let mut state = self.state.write().await;
        let key = (requester.to_string(), game_id.to_string());

        if let Some(existing) = state.by_game.get(&key).and_then(|id| state.tasks.get(id)) {
            if self.is_reusable(&existing.task) {
                return Submission {
                    task: existing.task.clone(),
                    is_existing: true,
                };
            }
        }

        let entry = self.new_entry(requester, game_id, batch_id);
        let task = entry.task.clone();
        state.by_game.insert(key, task.task_id);
        state.tasks.insert(task.task_id, entry);
        Submission {
            task,
            is_existing: false,
        }
    }

    /// Record a task that failed before it could be queued.
    ///
    /// It is not indexed, so it never blocks a later submission for the game.
    pub async fn insert_failed(
        &self,
        requester: &str,
        game_id: &str,
        batch_id: Option<Uuid>,
        error: TaskError,
    ) -> AnalysisTask {
        let mut entry = self.new_entry(requester, game_id, batch_id);
        entry.task.error = Some(error);
        entry.set_status(TaskStatus::Failed);
        let task = entry.task.clone();
        self.state.write().await.tasks.insert(task.task_id, entry);
        task
    }

    /// Compare-and-set the status of a task.
    pub async fn transition(
        &self,
        id: Uuid,
        expected: TaskStatus,
        next: TaskStatus,
    ) -> Result<AnalysisTask, TransitionError> {
        let mut state = self.state.write().await;
        let entry = state
            .tasks
            .get_mut(&id)
            .ok_or(TransitionError::NotFound(id))?;
        if entry.task.status != expected {
            return Err(TransitionError::Conflict {
                expected,
                actual: entry.task.status,
            });
        }
        if !expected.can_transition_to(next) {
            return Err(TransitionError::NotAllowed {
                from: expected,
                to: next,
            });
        }
        entry.set_status(next);
        Ok(entry.task.clone())
    }

    /// Move an InProgress task to Succeeded with its result.
    pub async fn complete(&self, id: Uuid, result: TaskResult) -> Result<(), TransitionError> {
        let mut state = self.state.write().await;
        let entry = state
            .tasks
            .get_mut(&id)
            .ok_or(TransitionError::NotFound(id))?;
        if entry.task.status != TaskStatus::InProgress {
            return Err(TransitionError::Conflict {
                expected: TaskStatus::InProgress,
                actual: entry.task.status,
            });
        }
        entry.task.progress.current = entry.task.progress.total;
        entry.task.result = Some(Arc::new(result));
        entry.set_status(TaskStatus::Succeeded);
        Ok(())
    }

    /// Fail a task from any non-terminal state. Returns `false` if it was
    /// already terminal or unknown.
    pub async fn fail(&self, id: Uuid, error: TaskError) -> bool {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(&id) {
            Some(entry) if !entry.task.status.is_terminal() => {
                entry.task.error = Some(error);
                entry.set_status(TaskStatus::Failed);
                true
            }
            _ => false,
        }
    }

    /// Set progress. `current` only ever rises and only while InProgress.
    pub async fn update_progress(&self, id: Uuid, current: u32, total: u32) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.tasks.get_mut(&id) else {
            return false;
        };
        if entry.task.status != TaskStatus::InProgress {
            return false;
        }
        entry.task.progress.total = total;
        if current > entry.task.progress.current {
            entry.task.progress.current = current.min(total);
        }
        entry.task.updated_at = now_timestamp();
        true
    }

    pub async fn record_retry(&self, id: Uuid) -> u32 {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(&id) {
            Some(entry) => {
                entry.task.retry_count += 1;
                entry.task.updated_at = now_timestamp();
                entry.task.retry_count
            }
            None => 0,
        }
    }

    /// Ask a task to stop. Pending tasks fail immediately; running ones are
    /// flagged and their token is cancelled.
    pub async fn request_cancel(&self, id: Uuid) -> Option<CancelOutcome> {
        let mut state = self.state.write().await;
        let entry = state.tasks.get_mut(&id)?;
        let outcome = match entry.task.status {
            TaskStatus::Pending => {
                entry.task.error = Some(TaskError::cancelled());
                entry.set_status(TaskStatus::Failed);
                CancelOutcome::Cancelled
            }
            TaskStatus::Started | TaskStatus::InProgress => {
                entry.cancel_requested = true;
                entry.cancel.cancel();
                CancelOutcome::Requested
            }
            status => CancelOutcome::AlreadyFinished(status),
        };
        Some(outcome)
    }

    pub async fn is_cancel_requested(&self, id: Uuid) -> bool {
        self.state
            .read()
            .await
            .tasks
            .get(&id)
            .is_some_and(|entry| entry.cancel_requested)
    }

    pub async fn cancel_token(&self, id: Uuid) -> Option<CancellationToken> {
        let state = self.state.read().await;
        state.tasks.get(&id).map(|entry| entry.cancel.clone())
    }

    pub async fn get(&self, id: Uuid) -> Option<AnalysisTask> {
        let state = self.state.read().await;
        state.tasks.get(&id).map(|entry| entry.task.clone())
    }

    /// Watch status changes of a task.
    pub async fn subscribe(&self, id: Uuid) -> Option<watch::Receiver<TaskStatus>> {
        let state = self.state.read().await;
        state.tasks.get(&id).map(|entry| entry.status_tx.subscribe())
    }

    /// Drop terminal tasks and finished batches not updated for `older_than`.
    pub async fn prune_finished(&self, older_than: Duration) -> usize {
        let cutoff = now_timestamp().saturating_sub(older_than.as_secs());
        let mut state = self.state.write().await;

        let expired: Vec<Uuid> = state
            .tasks
            .values()
            .filter(|entry| entry.task.status.is_terminal() && entry.task.updated_at <= cutoff)
            .map(|entry| entry.task.task_id)
            .collect();
        for id in &expired {
            if let Some(entry) = state.tasks.remove(id) {
                let key = (entry.task.requester, entry.task.game_id);
                if state.by_game.get(&key) == Some(id) {
                    state.by_game.remove(&key);
                }
            }
        }
        state.batches.retain(|_, entry| {
            entry.batch.status != TaskStatus::Succeeded || entry.batch.updated_at > cutoff
        });

        if !expired.is_empty() {
            tracing::debug!(pruned = expired.len(), "Pruned finished tasks");
        }
        expired.len()
    }

    /// Register a batch and settle the children that are already terminal.
    pub async fn insert_batch(&self, batch: BatchTask) -> BatchTask {
        let mut state = self.state.write().await;
        let mut entry = BatchEntry {
            settled: HashSet::new(),
            succeeded_metrics: Vec::new(),
            batch,
        };
        let children: Vec<Uuid> = entry.batch.children.iter().map(|c| c.task_id).collect();
        for task_id in children {
            settle(&state.tasks, &mut entry, task_id);
        }
        let snapshot = entry.batch.clone();
        state.batches.insert(snapshot.batch_id, entry);
        snapshot
    }

    pub async fn batch(&self, id: Uuid) -> Option<BatchTask> {
        let state = self.state.read().await;
        state.batches.get(&id).map(|entry| entry.batch.clone())
    }

    /// Account for a child that reached a terminal state. Idempotent.
    pub async fn settle_child(&self, batch_id: Uuid, task_id: Uuid) -> Option<BatchCounts> {
        let mut state = self.state.write().await;
        let StoreState { tasks, batches, .. } = &mut *state;
        let entry = batches.get_mut(&batch_id)?;
        settle(tasks, entry, task_id);
        Some(entry.batch.counts)
    }
}

fn settle(tasks: &HashMap<Uuid, TaskEntry>, entry: &mut BatchEntry, task_id: Uuid) {
    let outcome = match tasks.get(&task_id) {
        Some(entry) if !entry.task.status.is_terminal() => return,
        Some(entry) => match (&entry.task.result, &entry.task.error) {
            (Some(result), _) if entry.task.status == TaskStatus::Succeeded => {
                Ok(result.metrics.clone())
            }
            (_, Some(error)) => Err(error.clone()),
            _ => Err(TaskError::new(ErrorCode::Internal, "Task ended without a result")),
        },
        None => Err(TaskError::new(ErrorCode::Internal, "Task record expired")),
    };

    let Some(game_id) = entry
        .batch
        .children
        .iter()
        .find(|c| c.task_id == task_id)
        .map(|c| c.game_id.clone())
    else {
        return;
    };
    if !entry.settled.insert(task_id) {
        return;
    }

    let batch = &mut entry.batch;
    batch.counts.in_progress = batch.counts.in_progress.saturating_sub(1);
    match outcome {
        Ok(metrics) => {
            batch.counts.completed += 1;
            batch.completed_games.push(CompletedGame {
                game_id,
                task_id,
                accuracy: metrics.subject_metrics().accuracy,
            });
            entry.succeeded_metrics.push(metrics);
            batch.aggregate = aggregate_games(&entry.succeeded_metrics);
        }
        Err(error) => {
            batch.counts.failed += 1;
            batch.failed_games.push(FailedGame {
                game_id,
                task_id,
                code: error.code,
                message: error.message,
            });
        }
    }
    if batch.counts.in_progress == 0 {
        batch.status = TaskStatus::Succeeded;
    }
    batch.updated_at = now_timestamp();
}
