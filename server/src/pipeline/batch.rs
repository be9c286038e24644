//! Batch submission and supervision.

use std::collections::HashSet;
use std::sync::Arc;

use engine::EngineFactory;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{AnalysisJob, AnalysisManager};
use crate::error::{ErrorCode, ServiceError, TaskError};
use crate::feedback::FeedbackService;
use crate::games::{GameFilters, GameRepository};
use crate::tasks::{BatchChild, BatchTask, TaskStore};

/// Response to a batch submission.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSubmission {
    /// Id of the batch, polled through `batch_status`.
    pub task_id: Uuid,
    pub total_games: u32,
    pub estimated_time_seconds: u64,
}

enum Lookup {
    Accepted { plies: usize },
    Missing(TaskError),
}

/// Trimmed, non-empty ids in first-seen order.
fn dedupe(game_ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    game_ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

impl<F: EngineFactory, R: GameRepository, S: FeedbackService> AnalysisManager<F, R, S> {
    /// Create one task per game and supervise them as a batch.
    ///
    /// Games that do not exist become failed children. Games excluded by
    /// `filters` are left out of the batch.
    pub async fn submit_batch(
        &self,
        requester: &str,
        game_ids: Vec<String>,
        filters: GameFilters,
    ) -> Result<BatchSubmission, ServiceError> {
        self.ensure_running()?;
        let game_ids = dedupe(game_ids);
        if game_ids.is_empty() || game_ids.len() > self.config.max_batch_size {
            return Err(ServiceError::InvalidRequest(format!(
                "A batch needs between 1 and {} distinct games, got {}",
                self.config.max_batch_size,
                game_ids.len()
            )));
        }

        let mut selected: Vec<(String, Lookup)> = Vec::with_capacity(game_ids.len());
        for game_id in game_ids {
            let lookup = match self.games.get_game(&game_id).await {
                Ok(Some(game)) if filters.matches(&game.metadata) => Lookup::Accepted {
                    plies: game.moves.len(),
                },
                Ok(Some(_)) => continue,
                Ok(None) => Lookup::Missing(TaskError::new(
                    ErrorCode::GameNotFound,
                    format!("Game {} not found", game_id),
                )),
                Err(e) => Lookup::Missing(e.into()),
            };
            selected.push((game_id, lookup));
        }
        if selected.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "No games match the given filters".to_string(),
            ));
        }

        // Reserve queue slots for every accepted game before creating any task,
        // so a busy queue leaves nothing behind.
        let accepted = selected
            .iter()
            .filter(|(_, lookup)| matches!(lookup, Lookup::Accepted { .. }))
            .count();
        let mut permits = match accepted {
            0 => None,
            n => Some(self.job_tx.try_reserve_many(n).map_err(|e| match e {
                tokio::sync::mpsc::error::TrySendError::Full(()) => ServiceError::Busy,
                tokio::sync::mpsc::error::TrySendError::Closed(()) => ServiceError::ShuttingDown,
            })?),
        };

        let batch_id = Uuid::new_v4();
        let mut children = Vec::with_capacity(selected.len());
        let mut total_plies = 0usize;
        let mut dispatched = 0usize;
        for (game_id, lookup) in selected {
            let task_id = match lookup {
                Lookup::Accepted { plies } => {
                    total_plies += plies;
                    let submission = self.store.create_or_get(requester, &game_id, Some(batch_id)).await;
                    let task_id = submission.task.task_id;
                    if !submission.is_existing {
                        if let Some(permit) = permits.as_mut().and_then(Iterator::next) {
                            permit.send(AnalysisJob {
                                task_id,
                                game_id: game_id.clone(),
                            });
                            dispatched += 1;
                        }
                    }
                    task_id
                }
                Lookup::Missing(error) => {
                    self.store
                        .insert_failed(requester, &game_id, Some(batch_id), error)
                        .await
                        .task_id
                }
            };
            children.push(BatchChild { game_id, task_id });
        }
        drop(permits);

        let capacity = self.pool.capacity().max(1) as u64;
        let estimated_time_seconds =
            (total_plies as u64 * self.config.estimated_ms_per_position).div_ceil(capacity * 1000);

        let child_ids: Vec<Uuid> = children.iter().map(|c| c.task_id).collect();
        let batch = self
            .store
            .insert_batch(BatchTask::new(batch_id, requester, children, estimated_time_seconds))
            .await;

        tokio::spawn(supervise_batch(
            Arc::clone(&self.store),
            batch_id,
            child_ids,
            self.shutdown.clone(),
        ));

        tracing::info!(
            batch_id = %batch_id,
            requester,
            total = batch.counts.total,
            dispatched,
            failed = batch.counts.failed,
            "Batch submitted"
        );

        Ok(BatchSubmission {
            task_id: batch_id,
            total_games: batch.counts.total,
            estimated_time_seconds,
        })
    }
}

/// Wait for every child to reach a terminal state and settle it into the batch.
async fn supervise_batch(
    store: Arc<TaskStore>,
    batch_id: Uuid,
    children: Vec<Uuid>,
    shutdown: CancellationToken,
) {
    let mut waiting = JoinSet::new();
    for task_id in children {
        let receiver = store.subscribe(task_id).await;
        waiting.spawn(async move {
            if let Some(mut rx) = receiver {
                // An error means the task record was dropped; settle it anyway.
                let _ = rx.wait_for(|status| status.is_terminal()).await;
            }
            task_id
        });
    }

    loop {
        let joined = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(batch_id = %batch_id, "Batch supervisor stopped by shutdown");
                return;
            }
            joined = waiting.join_next() => joined,
        };
        match joined {
            Some(Ok(task_id)) => {
                if let Some(counts) = store.settle_child(batch_id, task_id).await {
                    tracing::debug!(
                        batch_id = %batch_id,
                        task_id = %task_id,
                        completed = counts.completed,
                        failed = counts.failed,
                        in_progress = counts.in_progress,
                        "Batch child finished"
                    );
                }
            }
            Some(Err(e)) => tracing::warn!(batch_id = %batch_id, "Batch watcher failed: {}", e),
            None => break,
        }
    }

    if let Some(batch) = store.batch(batch_id).await {
        tracing::info!(
            batch_id = %batch_id,
            completed = batch.counts.completed,
            failed = batch.counts.failed,
            "Batch finished"
        );
    }
}
