// crates/server/src/routes/mod.rs
//! API route handlers for the training server.

pub mod auth;
pub mod datasets;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod stream;
pub mod training;

use std::sync::Arc;

use axum::{middleware, Router};

use crate::state::AppState;

/// Create the combined router: JSON API under `/api` plus `/metrics`.
///
/// Routes:
/// - GET  /api/health - Health check
/// - GET  /api/jobs - List jobs (status/limit filters)
/// - POST /api/jobs - Create a job
/// - GET  /api/jobs/stats - Job counts by status
/// - GET  /api/jobs/{id} - Get one job
/// - DELETE /api/jobs/{id} - Delete a job that is not running
/// - POST /api/jobs/{id}/start - Start a pending job
/// - POST /api/jobs/{id}/cancel - Cancel a job
/// - GET  /api/jobs/{id}/events - Event log
/// - GET  /api/jobs/{id}/stream - SSE for one job
/// - GET  /api/jobs/stream/all - SSE for all jobs
/// - POST /api/training/start - Create and start in one call
/// - POST /api/training/{id}/pause|resume - Not implemented (501)
/// - POST /api/training/{id}/stop - Stop a job that is not finished
/// - GET  /api/training/{id}/progress - Latest metrics event
/// - GET  /api/training/{id}/metrics - Latest metrics snapshot
/// - GET  /api/training/active - Running jobs
/// - GET  /api/models - Trained models on disk (format/limit filters)
/// - GET  /api/models/{id} - One model
/// - DELETE /api/models/{id} - Delete a model whose job is not running
/// - GET  /api/models/{id}/download - Weights file
/// - GET  /api/datasets - Analyzed datasets under the datasets dir
/// - GET  /api/datasets/{id} - One dataset
/// - GET  /api/stream/{topic} - SSE for `jobs`, `system` or `training`
/// - GET  /api/stream/stats - Stream subscriber counts
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .nest("/api", training::router())
        .nest("/api", models::router())
        .nest("/api", datasets::router())
        .nest("/api", stream::router())
        .merge(metrics::router())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_bearer,
        ))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use visiontrain_core::JobStatus;

    use crate::config::ServerConfig;
    use crate::jobs::{JobManager, JobStore};
    use crate::sse::BroadcastHub;
    use crate::state::AppState;
    use crate::training::SimulatedTrainer;

    pub async fn test_state() -> (TempDir, Arc<AppState>) {
        test_state_with(&ServerConfig::default()).await
    }

    /// State rooted in a fresh temp dir; models and datasets live under
    /// `<tmp>/data`.
    pub async fn test_state_with(config: &ServerConfig) -> (TempDir, Arc<AppState>) {
        let tmp = TempDir::new().unwrap();
        let config = ServerConfig {
            data_dir: tmp.path().join("data"),
            ..config.clone()
        };
        let jobs = JobManager::open(
            JobStore::new(tmp.path().join("jobs.json")),
            Arc::new(SimulatedTrainer::new(Duration::from_millis(5))),
            Arc::new(BroadcastHub::new()),
            config.max_concurrent_jobs,
        )
        .await
        .unwrap();
        let state = AppState::new(jobs, &config);
        (tmp, state)
    }

    /// A three-class dataset with two training images and one validation image.
    pub fn dataset_dir(tmp: &TempDir) -> String {
        let root = tmp.path().join("dataset");
        write(&root.join("data.yaml"), "names: [bike, car, person]\n");
        write(&root.join("images/train/a.jpg"), "");
        write(&root.join("images/train/b.png"), "");
        write(&root.join("images/val/c.jpg"), "");
        root.display().to_string()
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub async fn get_json(state: &Arc<AppState>, uri: &str) -> (StatusCode, Value) {
        let app = crate::create_app(Arc::clone(state));
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        read_json(response).await
    }

    pub async fn send_json(
        state: &Arc<AppState>,
        method: Method,
        uri: &str,
        body: Value,
    ) -> (StatusCode, Value) {
        let app = crate::create_app(Arc::clone(state));
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        read_json(response).await
    }

    async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    /// Poll until the job reaches `status`, failing after five seconds.
    pub async fn wait_for(state: &Arc<AppState>, id: &str, status: JobStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let current = state.jobs.get_job(id).map(|j| j.status);
            if current == Some(status) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stuck at {current:?}, expected {status}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
