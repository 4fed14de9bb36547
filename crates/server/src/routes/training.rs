// crates/server/src/routes/training.rs
//! Training control endpoints layered over the job manager.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use visiontrain_core::{Job, JobCreateRequest, JobStatus, ProgressEvent, TrainingMetrics};

use crate::error::{ApiError, ApiResult};
use crate::jobs::JobError;
use crate::state::AppState;

/// Response for `GET /training/{id}/metrics`.
#[derive(Debug, Serialize)]
pub struct JobMetricsResponse {
    pub job_id: String,
    pub metrics: Option<TrainingMetrics>,
    pub status: JobStatus,
}

/// POST /api/training/start - Create a job and start it immediately.
///
/// The job stays `pending` (or `failed` on launch failure) when start is
/// rejected; the start error is what the caller sees.
async fn start_training(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JobCreateRequest>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.jobs.create_job(request).await?;
    let job = state.jobs.start_job(&job.id).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// POST /api/training/{id}/pause
async fn pause_training(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.pause_job(&id)?))
}

/// POST /api/training/{id}/resume
async fn resume_training(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.resume_job(&id)?))
}

/// POST /api/training/{id}/stop
async fn stop_training(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state
        .jobs
        .get_job(&id)
        .ok_or_else(|| JobError::NotFound(id.clone()))?;
    if job.status.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "Job {id} is already {}",
            job.status
        )));
    }
    Ok(Json(state.jobs.cancel_job(&id).await?))
}

/// GET /api/training/{id}/progress - Latest `metrics` event.
async fn training_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProgressEvent>> {
    if state.jobs.get_job(&id).is_none() {
        return Err(JobError::NotFound(id).into());
    }
    state
        .jobs
        .latest_metrics_event(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No progress reported yet for job {id}")))
}

/// GET /api/training/{id}/metrics
async fn training_metrics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobMetricsResponse>> {
    let job = state.jobs.get_job(&id).ok_or(JobError::NotFound(id))?;
    Ok(Json(JobMetricsResponse {
        job_id: job.id,
        metrics: job.metrics,
        status: job.status,
    }))
}

/// GET /api/training/active
async fn active_training(State(state): State<Arc<AppState>>) -> Json<Vec<Job>> {
    Json(state.jobs.running_jobs())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/training/start", post(start_training))
        .route("/training/active", get(active_training))
        .route("/training/{id}/pause", post(pause_training))
        .route("/training/{id}/resume", post(resume_training))
        .route("/training/{id}/stop", post(stop_training))
        .route("/training/{id}/progress", get(training_progress))
        .route("/training/{id}/metrics", get(training_metrics))
}
