// crates/server/src/routes/jobs.rs
//! Job CRUD and per-job event streams.
//!
//! - GET    /jobs?status=&limit=  - List jobs, newest first
//! - POST   /jobs                 - Create a job in `pending`
//! - GET    /jobs/stats           - Counts by status
//! - GET    /jobs/{id}            - One job
//! - DELETE /jobs/{id}            - Remove a job that is not running
//! - POST   /jobs/{id}/start      - Admit a pending job
//! - POST   /jobs/{id}/cancel     - Cancel (idempotent on terminal jobs)
//! - GET    /jobs/{id}/events     - Bounded event log
//! - GET    /jobs/{id}/stream     - SSE for one job
//! - GET    /jobs/stream/all      - SSE for every job

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use visiontrain_core::{Job, JobCreateRequest, JobStats, JobStatus, ProgressEvent};

use super::stream::sse_response;
use crate::error::{ApiError, ApiResult};
use crate::jobs::JobError;
use crate::sse::Topic;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct DeleteJobResponse {
    pub message: String,
    pub job_id: String,
}

/// GET /api/jobs
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(state.jobs.list_jobs(status, query.limit)))
}

/// POST /api/jobs
async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JobCreateRequest>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.jobs.create_job(request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/jobs/stats
async fn job_stats(State(state): State<Arc<AppState>>) -> Json<JobStats> {
    Json(state.jobs.get_stats())
}

/// GET /api/jobs/{id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    state
        .jobs
        .get_job(&id)
        .map(Json)
        .ok_or_else(|| JobError::NotFound(id).into())
}

/// DELETE /api/jobs/{id}
async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteJobResponse>> {
    let job = state.jobs.delete_job(&id).await?;
    Ok(Json(DeleteJobResponse {
        message: format!("Job '{}' deleted", job.name),
        job_id: job.id,
    }))
}

/// POST /api/jobs/{id}/start
async fn start_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.start_job(&id).await?))
}

/// POST /api/jobs/{id}/cancel
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.cancel_job(&id).await?))
}

/// GET /api/jobs/{id}/events
async fn job_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ProgressEvent>>> {
    if state.jobs.get_job(&id).is_none() {
        return Err(JobError::NotFound(id).into());
    }
    Ok(Json(state.jobs.get_job_events(&id)))
}

/// GET /api/jobs/{id}/stream
async fn stream_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if state.jobs.get_job(&id).is_none() {
        return Err(JobError::NotFound(id).into());
    }
    Ok(sse_response(state.hub.stream(Topic::Jobs, Some(id))))
}

/// GET /api/jobs/stream/all
async fn stream_all_jobs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sse_response(state.hub.stream(Topic::Jobs, None))
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/stats", get(job_stats))
        .route("/jobs/stream/all", get(stream_all_jobs))
        .route("/jobs/{id}", get(get_job).delete(delete_job))
        .route("/jobs/{id}/start", post(start_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/events", get(job_events))
        .route("/jobs/{id}/stream", get(stream_job))
}
