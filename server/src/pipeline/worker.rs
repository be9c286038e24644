use std::sync::Arc;

use analysis::{classify_move, compute_game_metrics, AnalysisScore, MoveEvaluation, PlyEvaluation};
use chess::{replay_game, ReplayedPly};
use engine::{EngineError, EngineFactory, PositionEvaluation};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{AnalysisJob, WorkerContext};
use crate::error::{ErrorCode, TaskError};
use crate::feedback::FeedbackService;
use crate::games::{GameRecord, GameRepository};
use crate::tasks::{TaskResult, TaskStatus};

/// A long-lived worker task. Receives jobs from the shared channel and
/// processes them one at a time.
pub(crate) async fn run_analysis_worker<F, R, S>(
    worker_id: usize,
    job_rx: Arc<Mutex<mpsc::Receiver<AnalysisJob>>>,
    ctx: Arc<WorkerContext<F, R, S>>,
    shutdown: CancellationToken,
) where
    F: EngineFactory,
    R: GameRepository,
    S: FeedbackService,
{
    tracing::info!(worker_id, "Analysis worker started");

    loop {
        // Wait for next job (only one worker picks up each job)
        let job = {
            let mut rx = job_rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!(worker_id, "Shutdown requested, worker exiting");
                    break;
                }
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => {
                        tracing::info!(worker_id, "Job channel closed, worker exiting");
                        break;
                    }
                },
            }
        };

        // A task cancelled while queued is already Failed and must not start.
        if let Err(e) = ctx
            .store
            .transition(job.task_id, TaskStatus::Pending, TaskStatus::Started)
            .await
        {
            tracing::debug!(worker_id, task_id = %job.task_id, "Skipping job: {}", e);
            continue;
        }

        tracing::info!(worker_id, task_id = %job.task_id, game_id = %job.game_id, "Starting analysis");

        match analyze_task(worker_id, &job, &ctx).await {
            Ok(result) => {
                let accuracy = result.metrics.subject_metrics().accuracy;
                match ctx.store.complete(job.task_id, result).await {
                    Ok(()) => tracing::info!(
                        worker_id,
                        task_id = %job.task_id,
                        game_id = %job.game_id,
                        accuracy,
                        "Analysis complete"
                    ),
                    Err(e) => tracing::warn!(worker_id, task_id = %job.task_id, "Could not store result: {}", e),
                }
            }
            Err(e) => {
                tracing::warn!(
                    worker_id,
                    task_id = %job.task_id,
                    game_id = %job.game_id,
                    code = %e.code,
                    "Analysis failed: {}",
                    e.message
                );
                ctx.store.fail(job.task_id, e).await;
            }
        }
    }
}

/// Replay the game, evaluate every position, then derive metrics and feedback.
///
/// A game of N moves has N+1 positions. Position `i` is evaluated once and
/// serves both as the "after" of move `i` and the "before" of move `i + 1`.
async fn analyze_task<F, R, S>(
    worker_id: usize,
    job: &AnalysisJob,
    ctx: &WorkerContext<F, R, S>,
) -> Result<TaskResult, TaskError>
where
    F: EngineFactory,
    R: GameRepository,
    S: FeedbackService,
{
    let game = load_game(ctx, &job.game_id).await?;
    let plies = replay_game(game.start_fen.as_deref(), &game.moves)
        .map_err(|e| TaskError::new(ErrorCode::InvalidGameData, e.to_string()))?;
    if plies.is_empty() {
        return Err(TaskError::new(
            ErrorCode::InsufficientData,
            format!("Game {} has no moves", job.game_id),
        ));
    }
    let total = plies.len() as u32;

    ctx.store
        .transition(job.task_id, TaskStatus::Started, TaskStatus::InProgress)
        .await
        .map_err(|e| TaskError::new(ErrorCode::Internal, e.to_string()))?;
    ctx.store.update_progress(job.task_id, 0, total).await;

    let cancel = ctx
        .store
        .cancel_token(job.task_id)
        .await
        .ok_or_else(|| TaskError::new(ErrorCode::Internal, "Task record disappeared"))?;

    let mut positions: Vec<PositionEvaluation> = Vec::with_capacity(plies.len() + 1);
    positions.push(evaluate_position(ctx, job.task_id, &plies[0].fen_before, None, &cancel).await?);

    for (index, ply) in plies.iter().enumerate() {
        if ctx.store.is_cancel_requested(job.task_id).await {
            return Err(TaskError::cancelled());
        }
        let evaluation = evaluate_position(ctx, job.task_id, &ply.fen_after, Some(ply), &cancel).await?;
        positions.push(evaluation);

        let done = index as u32 + 1;
        ctx.store.update_progress(job.task_id, done, total).await;
        tracing::debug!(worker_id, task_id = %job.task_id, ply = ply.ply, "Position analyzed");
    }

    let config = &ctx.config.metrics;
    let moves: Vec<MoveEvaluation> = plies
        .iter()
        .enumerate()
        .map(|(i, ply)| {
            let before = &positions[i];
            let eval = PlyEvaluation {
                before: before.score,
                after: positions[i + 1].score,
                best_move: before.best_move.clone(),
                principal_variation: before.principal_variation.clone(),
                depth: before.depth,
            };
            classify_move(ply, eval, game.time_spent(i), config)
        })
        .collect();

    let metrics = compute_game_metrics(&game.game_id, &moves, plies.len(), game.subject(), config)
        .map_err(|e| TaskError::new(ErrorCode::InsufficientData, e.to_string()))?;
    let feedback = ctx.feedback.synthesize(Some(&metrics)).await;

    Ok(TaskResult {
        metrics,
        moves,
        feedback,
    })
}

async fn load_game<F, R, S>(ctx: &WorkerContext<F, R, S>, game_id: &str) -> Result<GameRecord, TaskError>
where
    F: EngineFactory,
    R: GameRepository,
    S: FeedbackService,
{
    match ctx.games.get_game(game_id).await {
        Ok(Some(game)) => Ok(game),
        Ok(None) => Err(TaskError::new(
            ErrorCode::GameNotFound,
            format!("Game {} not found", game_id),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Evaluate one position, retrying transient engine failures.
///
/// Positions reached by a game-ending move are scored without the engine:
/// checkmate is mate in 0 for the side to move, any other terminal position is
/// a draw.
async fn evaluate_position<F, R, S>(
    ctx: &WorkerContext<F, R, S>,
    task_id: Uuid,
    fen: &str,
    reached_by: Option<&ReplayedPly>,
    cancel: &CancellationToken,
) -> Result<PositionEvaluation, TaskError>
where
    F: EngineFactory,
    R: GameRepository,
    S: FeedbackService,
{
    if let Some(ply) = reached_by.filter(|p| p.is_terminal) {
        let score = if ply.is_checkmate {
            AnalysisScore::Mate(0)
        } else {
            AnalysisScore::Centipawns(0)
        };
        return Ok(PositionEvaluation {
            score,
            best_move: None,
            principal_variation: Vec::new(),
            depth: 0,
        });
    }

    let config = &ctx.config;
    let mut limit = config.search_limit;
    let mut attempt = 1;
    loop {
        let result = match ctx.pool.checkout(config.checkout_timeout, cancel).await {
            Ok(mut lease) => lease.evaluate(fen, limit).await,
            Err(e) => Err(e),
        };
        let err = match result {
            Ok(evaluation) => return Ok(evaluation),
            Err(EngineError::Cancelled) => return Err(TaskError::cancelled()),
            Err(e) => e,
        };

        if !err.is_transient() || !config.retry.should_retry(attempt) {
            return Err(TaskError::from(err));
        }
        if matches!(err, EngineError::EvaluationTimeout(_)) {
            limit = limit.reduced(config.depth_step);
        }
        let retries = ctx.store.record_retry(task_id).await;
        tracing::debug!(task_id = %task_id, attempt, retries, ?limit, "Retrying evaluation: {}", err);
        if !config.retry.wait(attempt, cancel).await {
            return Err(TaskError::cancelled());
        }
        attempt += 1;
    }
}
