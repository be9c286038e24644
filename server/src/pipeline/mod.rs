//! Analysis pipeline: job queue, worker pool and batch orchestration.

mod batch;
mod worker;

pub use batch::BatchSubmission;

use std::sync::Arc;
use std::time::Duration;

use analysis::MetricsConfig;
use engine::{EngineFactory, EnginePool, PoolStats, SearchLimit};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::feedback::{FeedbackService, FeedbackSynthesizer};
use crate::games::GameRepository;
use crate::retry::RetryPolicy;
use crate::tasks::{AnalysisTask, BatchTask, CancelOutcome, TaskStatus, TaskStore};

/// Configuration for the analysis pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of worker tasks pulling from the job queue.
    pub worker_count: usize,
    /// Bound of the job queue. A full queue rejects submissions as busy.
    pub queue_capacity: usize,
    pub search_limit: SearchLimit,
    /// Depth removed from the search limit after an evaluation timeout.
    pub depth_step: u8,
    /// How long one position may wait for a free engine.
    pub checkout_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_batch_size: usize,
    pub estimated_ms_per_position: u64,
    pub reuse_completed_for: Duration,
    pub metrics: MetricsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            queue_capacity: 64,
            search_limit: SearchLimit::Depth(16),
            depth_step: 4,
            checkout_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            max_batch_size: 50,
            estimated_ms_per_position: 250,
            reuse_completed_for: Duration::ZERO,
            metrics: MetricsConfig::default(),
        }
    }
}

/// A queued analysis.
#[derive(Debug, Clone)]
pub(crate) struct AnalysisJob {
    pub task_id: Uuid,
    pub game_id: String,
}

/// Response to a single-game submission.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalysisSubmission {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub is_existing_task: bool,
}

/// Everything a worker needs, shared between all workers.
pub(crate) struct WorkerContext<F: EngineFactory, R: GameRepository, S: FeedbackService> {
    pub store: Arc<TaskStore>,
    pub games: Arc<R>,
    pub pool: EnginePool<F>,
    pub feedback: Arc<FeedbackSynthesizer<S>>,
    pub config: Arc<PipelineConfig>,
}

/// Owns the bounded job queue and the fixed pool of worker tasks.
///
/// Submissions create or reuse tasks in the [`TaskStore`] and push a job per
/// new task. Workers share one receiver, so each job is picked up exactly once.
pub struct AnalysisManager<F: EngineFactory, R: GameRepository, S: FeedbackService> {
    job_tx: mpsc::Sender<AnalysisJob>,
    store: Arc<TaskStore>,
    games: Arc<R>,
    pool: EnginePool<F>,
    feedback: Arc<FeedbackSynthesizer<S>>,
    config: Arc<PipelineConfig>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Kept alive so the channel stays open even if no workers are spawned.
    _job_rx: Arc<Mutex<mpsc::Receiver<AnalysisJob>>>,
}

impl<F: EngineFactory, R: GameRepository, S: FeedbackService> AnalysisManager<F, R, S> {
    pub fn new(
        pool: EnginePool<F>,
        games: Arc<R>,
        feedback: FeedbackSynthesizer<S>,
        config: PipelineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<AnalysisJob>(config.queue_capacity.max(1));
        let shared_rx = Arc::new(Mutex::new(job_rx));
        let store = Arc::new(TaskStore::new(shutdown.child_token(), config.reuse_completed_for));
        let config = Arc::new(config);
        let feedback = Arc::new(feedback.with_shutdown(shutdown.clone()));

        let context = Arc::new(WorkerContext {
            store: Arc::clone(&store),
            games: Arc::clone(&games),
            pool: pool.clone(),
            feedback: Arc::clone(&feedback),
            config: Arc::clone(&config),
        });

        let workers = (0..config.worker_count)
            .map(|worker_id| {
                tokio::spawn(worker::run_analysis_worker(
                    worker_id,
                    Arc::clone(&shared_rx),
                    Arc::clone(&context),
                    shutdown.clone(),
                ))
            })
            .collect();

        tracing::info!(
            worker_count = config.worker_count,
            queue_capacity = config.queue_capacity,
            pool_capacity = pool.capacity(),
            limit = ?config.search_limit,
            "Analysis manager initialized"
        );

        Self {
            job_tx,
            store,
            games,
            pool,
            feedback,
            config,
            shutdown,
            workers: Mutex::new(workers),
            _job_rx: shared_rx,
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn ai_feedback_enabled(&self) -> bool {
        self.feedback.ai_enabled()
    }

    pub fn queued_jobs(&self) -> usize {
        self.job_tx.max_capacity() - self.job_tx.capacity()
    }

    fn ensure_running(&self) -> Result<(), ServiceError> {
        if self.shutdown.is_cancelled() {
            return Err(ServiceError::ShuttingDown);
        }
        Ok(())
    }

    /// Queue one game for analysis, or return the live task for it.
    pub async fn submit_analysis(
        &self,
        requester: &str,
        game_id: &str,
    ) -> Result<AnalysisSubmission, ServiceError> {
        self.ensure_running()?;
        if game_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("game_id must not be empty".to_string()));
        }

        // The queue slot is reserved before the task exists: a rejected
        // request leaves nothing in the store.
        let permit = match self.job_tx.try_reserve() {
            Ok(permit) => permit,
            Err(e) => {
                if let Some(task) = self.store.find_live(requester, game_id).await {
                    return Ok(AnalysisSubmission {
                        task_id: task.task_id,
                        status: task.status,
                        is_existing_task: true,
                    });
                }
                tracing::warn!(game_id, "Rejecting analysis request: {}", e);
                return Err(match e {
                    mpsc::error::TrySendError::Full(()) => ServiceError::Busy,
                    mpsc::error::TrySendError::Closed(()) => ServiceError::ShuttingDown,
                });
            }
        };

        let submission = self.store.create_or_get(requester, game_id, None).await;
        let task = submission.task;
        if submission.is_existing {
            tracing::debug!(task_id = %task.task_id, game_id, "Returning existing task");
            return Ok(AnalysisSubmission {
                task_id: task.task_id,
                status: task.status,
                is_existing_task: true,
            });
        }

        permit.send(AnalysisJob {
            task_id: task.task_id,
            game_id: game_id.to_string(),
        });
        tracing::info!(task_id = %task.task_id, requester, game_id, "Queued game for analysis");
        Ok(AnalysisSubmission {
            task_id: task.task_id,
            status: task.status,
            is_existing_task: false,
        })
    }

    pub async fn task_status(&self, task_id: Uuid) -> Result<AnalysisTask, ServiceError> {
        self.store
            .get(task_id)
            .await
            .ok_or(ServiceError::TaskNotFound(task_id))
    }

    pub async fn batch_status(&self, batch_id: Uuid) -> Result<BatchTask, ServiceError> {
        self.store
            .batch(batch_id)
            .await
            .ok_or(ServiceError::BatchNotFound(batch_id))
    }

    pub async fn cancel_task(&self, task_id: Uuid) -> Result<CancelOutcome, ServiceError> {
        let outcome = self
            .store
            .request_cancel(task_id)
            .await
            .ok_or(ServiceError::TaskNotFound(task_id))?;
        tracing::info!(task_id = %task_id, outcome = ?outcome, "Cancel requested");
        Ok(outcome)
    }

    /// Stop accepting work, stop the workers and shut down idle engines.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!("Worker ended abnormally: {}", e);
            }
        }
        self.pool.shutdown().await;
        tracing::info!("Analysis manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::OpenAiFeedbackService;
    use crate::games::{GameMetadata, GameRecord, JsonGameStore};
    use analysis::AnalysisScore;
    use engine::mock::ScriptedFactory;
    use std::collections::HashSet;

    type TestManager = AnalysisManager<ScriptedFactory, JsonGameStore, OpenAiFeedbackService>;

    async fn manager(dir: &std::path::Path, worker_count: usize, queue_capacity: usize) -> TestManager {
        let games = JsonGameStore::new(dir.to_path_buf());
        games
            .save(&GameRecord {
                game_id: "g1".to_string(),
                start_fen: None,
                moves: vec!["e4".to_string(), "e5".to_string()],
                time_spent_ms: None,
                metadata: GameMetadata::default(),
            })
            .await
            .unwrap();
        let pool = EnginePool::new(ScriptedFactory::constant(AnalysisScore::Centipawns(0)), 1);
        let feedback = FeedbackSynthesizer::new(None, RetryPolicy::none(), Duration::from_secs(1));
        AnalysisManager::new(
            pool,
            Arc::new(games),
            feedback,
            PipelineConfig {
                worker_count,
                queue_capacity,
                ..PipelineConfig::default()
            },
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_full_queue_is_busy_and_leaves_no_task() {
        let tmp = tempfile::tempdir().unwrap();
        // No workers: the single queue slot stays occupied.
        let manager = manager(tmp.path(), 0, 1).await;

        let first = manager.submit_analysis("alice", "g1").await.unwrap();
        assert!(!first.is_existing_task);
        assert_eq!(manager.queued_jobs(), 1);

        let err = manager.submit_analysis("alice", "g2").await.unwrap_err();
        assert!(matches!(err, ServiceError::Busy));
        assert!(err.is_retryable());

        // The rejected game can be submitted again and is not reported as existing.
        let err = manager.submit_analysis("alice", "g2").await.unwrap_err();
        assert!(matches!(err, ServiceError::Busy));
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_against_full_queue_share_a_real_task() {
        for _ in 0..20 {
            let tmp = tempfile::tempdir().unwrap();
            // One slot left after g1.
            let manager = Arc::new(manager(tmp.path(), 0, 2).await);
            manager.submit_analysis("alice", "g1").await.unwrap();

            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let manager = Arc::clone(&manager);
                    tokio::spawn(async move { manager.submit_analysis("alice", "g2").await })
                })
                .collect();

            let mut ids = HashSet::new();
            let mut created = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(submission) => {
                        if !submission.is_existing_task {
                            created += 1;
                        }
                        ids.insert(submission.task_id);
                    }
                    Err(err) => assert!(matches!(err, ServiceError::Busy), "{err}"),
                }
            }

            assert_eq!(created, 1);
            assert_eq!(ids.len(), 1);
            for id in ids {
                let task = manager.task_status(id).await.unwrap();
                assert_eq!(task.status, TaskStatus::Pending);
            }
            assert_eq!(manager.queued_jobs(), 2);
        }
    }

    #[tokio::test]
    async fn test_full_queue_still_returns_live_duplicate() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), 0, 1).await;
        let first = manager.submit_analysis("alice", "g1").await.unwrap();

        let again = manager.submit_analysis("alice", "g1").await.unwrap();
        assert!(again.is_existing_task);
        assert_eq!(again.task_id, first.task_id);
        assert!(manager.store().find_live("alice", "g2").await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_submission_returns_existing_task() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), 0, 4).await;
        let first = manager.submit_analysis("alice", "g1").await.unwrap();
        let second = manager.submit_analysis("alice", "g1").await.unwrap();
        assert!(second.is_existing_task);
        assert_eq!(first.task_id, second.task_id);
        assert_eq!(manager.queued_jobs(), 1);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), 0, 4).await;
        assert!(matches!(
            manager.task_status(Uuid::new_v4()).await,
            Err(ServiceError::TaskNotFound(_))
        ));
        assert!(matches!(
            manager.cancel_task(Uuid::new_v4()).await,
            Err(ServiceError::TaskNotFound(_))
        ));
        assert!(matches!(
            manager.submit_analysis("alice", "  ").await,
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), 2, 4).await;
        manager.shutdown().await;
        assert!(matches!(
            manager.submit_analysis("alice", "g1").await,
            Err(ServiceError::ShuttingDown)
        ));
    }
}
