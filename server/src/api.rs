//! HTTP surface over the [`AnalysisManager`].
//!
//! Authentication happens upstream; the caller's identity arrives in the
//! `X-Requester-Id` header.

use std::sync::Arc;

use analysis::BatchAggregate;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use engine::EngineFactory;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{ServiceError, TaskError};
use crate::feedback::FeedbackService;
use crate::games::{GameFilters, GameRepository};
use crate::pipeline::AnalysisManager;
use crate::tasks::{
    AnalysisTask, BatchTask, CancelOutcome, CompletedGame, FailedGame, Progress, TaskResult,
    TaskStatus,
};

pub const REQUESTER_HEADER: &str = "x-requester-id";
const RETRY_AFTER_SECS: u64 = 5;

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::TaskNotFound(_) | ServiceError::BatchNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Busy | ServiceError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(json!({
            "code": self.code(),
            "detail": self.to_string(),
            "retryable": self.is_retryable(),
        }));
        if matches!(self, ServiceError::Busy) {
            let retry_after = [(header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())];
            return (status, retry_after, body).into_response();
        }
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalysisRequest {
    pub game_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub game_ids: Vec<String>,
    #[serde(default)]
    pub filters: GameFilters,
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: Uuid,
    pub game_id: String,
    pub status: TaskStatus,
    pub progress: Progress,
    pub message: String,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<TaskResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<AnalysisTask> for TaskStatusResponse {
    fn from(task: AnalysisTask) -> Self {
        Self {
            message: task.message(),
            task_id: task.task_id,
            game_id: task.game_id,
            status: task.status,
            progress: task.progress,
            retry_count: task.retry_count,
            result: task.result,
            error: task.error,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchMeta {
    pub current: u32,
    pub total: u32,
    pub progress_percent: f64,
}

#[derive(Debug, Serialize)]
pub struct BatchStatusResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub meta: BatchMeta,
    pub completed_games: Vec<CompletedGame>,
    pub failed_games: Vec<FailedGame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_metrics: Option<BatchAggregate>,
    pub estimated_time_seconds: u64,
}

impl From<BatchTask> for BatchStatusResponse {
    fn from(batch: BatchTask) -> Self {
        Self {
            meta: BatchMeta {
                current: batch.counts.completed + batch.counts.failed,
                total: batch.counts.total,
                progress_percent: batch.progress_percent(),
            },
            task_id: batch.batch_id,
            status: batch.status,
            completed_games: batch.completed_games,
            failed_games: batch.failed_games,
            aggregate_metrics: batch.aggregate,
            estimated_time_seconds: batch.estimated_time_seconds,
        }
    }
}

fn requester(headers: &HeaderMap) -> Result<String, ServiceError> {
    headers
        .get(REQUESTER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ServiceError::InvalidRequest("X-Requester-Id header is required".to_string())
        })
}

fn parse_id(raw: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw)
        .map_err(|_| ServiceError::InvalidRequest(format!("'{}' is not a valid task id", raw)))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    payload
        .map(|Json(request)| request)
        .map_err(|rejection| ServiceError::InvalidRequest(rejection.body_text()))
}

async fn submit_analysis<F, R, S>(
    State(manager): State<Arc<AnalysisManager<F, R, S>>>,
    headers: HeaderMap,
    payload: Result<Json<AnalysisRequest>, JsonRejection>,
) -> Result<Response, ServiceError>
where
    F: EngineFactory,
    R: GameRepository,
    S: FeedbackService,
{
    let requester = requester(&headers)?;
    let request = body(payload)?;
    let submission = manager.submit_analysis(&requester, &request.game_id).await?;
    let status = if submission.is_existing_task {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(submission)).into_response())
}

async fn submit_batch<F, R, S>(
    State(manager): State<Arc<AnalysisManager<F, R, S>>>,
    headers: HeaderMap,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Response, ServiceError>
where
    F: EngineFactory,
    R: GameRepository,
    S: FeedbackService,
{
    let requester = requester(&headers)?;
    let request = body(payload)?;
    let submission = manager
        .submit_batch(&requester, request.game_ids, request.filters)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(submission)).into_response())
}

async fn task_status<F, R, S>(
    State(manager): State<Arc<AnalysisManager<F, R, S>>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ServiceError>
where
    F: EngineFactory,
    R: GameRepository,
    S: FeedbackService,
{
    let task = manager.task_status(parse_id(&task_id)?).await?;
    Ok(Json(task.into()))
}

async fn batch_status<F, R, S>(
    State(manager): State<Arc<AnalysisManager<F, R, S>>>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchStatusResponse>, ServiceError>
where
    F: EngineFactory,
    R: GameRepository,
    S: FeedbackService,
{
    let batch = manager.batch_status(parse_id(&batch_id)?).await?;
    Ok(Json(batch.into()))
}

async fn cancel_task<F, R, S>(
    State(manager): State<Arc<AnalysisManager<F, R, S>>>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError>
where
    F: EngineFactory,
    R: GameRepository,
    S: FeedbackService,
{
    let task_id = parse_id(&task_id)?;
    let outcome = match manager.cancel_task(task_id).await? {
        CancelOutcome::Cancelled => "cancelled",
        CancelOutcome::Requested => "cancel_requested",
        CancelOutcome::AlreadyFinished(_) => "already_finished",
    };
    Ok(Json(json!({ "task_id": task_id, "outcome": outcome })))
}

async fn health<F, R, S>(State(manager): State<Arc<AnalysisManager<F, R, S>>>) -> Json<serde_json::Value>
where
    F: EngineFactory,
    R: GameRepository,
    S: FeedbackService,
{
    let pool = manager.pool_stats();
    Json(json!({
        "status": "ok",
        "queued_jobs": manager.queued_jobs(),
        "ai_feedback": manager.ai_feedback_enabled(),
        "engine_pool": {
            "capacity": pool.capacity,
            "idle": pool.idle,
            "checked_out": pool.checked_out,
            "spawned": pool.spawned,
            "retired": pool.retired,
        },
    }))
}

/// Build the application router.
pub fn router<F, R, S>(manager: Arc<AnalysisManager<F, R, S>>) -> Router
where
    F: EngineFactory,
    R: GameRepository,
    S: FeedbackService,
{
    Router::new()
        .route("/health", get(health::<F, R, S>))
        .route("/api/analysis", post(submit_analysis::<F, R, S>))
        // Specific routes before parameterized
        .route("/api/analysis/batch", post(submit_batch::<F, R, S>))
        .route("/api/analysis/batch/{batch_id}", get(batch_status::<F, R, S>))
        .route("/api/analysis/{task_id}", get(task_status::<F, R, S>))
        .route("/api/analysis/{task_id}/cancel", post(cancel_task::<F, R, S>))
        .with_state(manager)
}
