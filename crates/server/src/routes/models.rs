// crates/server/src/routes/models.rs
//! Trained model catalogue endpoints.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use visiontrain_core::JobStatus;

use crate::catalog::{self, ModelInfo};
use crate::error::{ApiError, ApiResult};
use crate::jobs::JobError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListModelsQuery {
    pub format: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct DeleteModelResponse {
    pub id: String,
    pub deleted: bool,
}

fn check_id(id: &str) -> ApiResult<()> {
    if catalog::is_valid_entry_id(id) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("Invalid model id: {id}")))
    }
}

async fn find_model(state: &AppState, id: &str) -> ApiResult<ModelInfo> {
    check_id(id)?;
    catalog::model_info(&state.models_dir, id)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to read model {id}: {e}")))?
        .ok_or_else(|| ApiError::NotFound(format!("Model {id}")))
}

/// GET /api/models - Models on disk, newest first.
async fn list_models(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListModelsQuery>,
) -> ApiResult<Json<Vec<ModelInfo>>> {
    let mut models = catalog::list_models(&state.models_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to list models: {e}")))?;
    if let Some(format) = query.format.as_deref() {
        let format = format.trim_start_matches('.');
        models.retain(|m| m.format.eq_ignore_ascii_case(format));
    }
    models.truncate(query.limit.unwrap_or(100));
    Ok(Json(models))
}

/// GET /api/models/{id}
async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ModelInfo>> {
    Ok(Json(find_model(&state, &id).await?))
}

/// DELETE /api/models/{id} - Refused while the job that owns the model is
/// still running.
async fn delete_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteModelResponse>> {
    check_id(&id)?;
    if let Some(job) = state.jobs.get_job(&id) {
        if job.status == JobStatus::Running {
            return Err(JobError::InvalidState {
                id,
                status: job.status,
                action: "delete its model",
            }
            .into());
        }
    }

    let deleted = catalog::delete_model(&state.models_dir, &id)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to delete model {id}: {e}")))?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Model {id}")));
    }
    tracing::info!(model = %id, "Model deleted");
    Ok(Json(DeleteModelResponse { id, deleted }))
}

/// GET /api/models/{id}/download - The weights file as an attachment.
async fn download_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let model = find_model(&state, &id).await?;
    let file = tokio::fs::File::open(&model.file_path)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to open model {id}: {e}")))?;

    let filename: String = format!("{id}.{}", model.format)
        .chars()
        .filter(|c| c.is_ascii_graphic() && *c != '"')
        .collect();
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_LENGTH, model.file_size.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// Create the model routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models", get(list_models))
        .route("/models/{id}", get(get_model).delete(delete_model))
        .route("/models/{id}/download", get(download_model))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{dataset_dir, get_json, send_json, test_state, wait_for};
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;
    use visiontrain_core::JobStatus;

    fn write_model(dir: &std::path::Path, id: &str, bytes: &[u8]) {
        let model_dir = dir.join(id);
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("best.pt"), bytes).unwrap();
    }

    #[tokio::test]
    async fn test_list_and_get_models() {
        let (_tmp, state) = test_state().await;
        let (status, body) = get_json(&state, "/api/models").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        write_model(&state.models_dir, "job_a", b"weights");
        std::fs::create_dir_all(state.models_dir.join("custom")).unwrap();
        std::fs::write(state.models_dir.join("custom/model.onnx"), b"onnx").unwrap();

        let (_, body) = get_json(&state, "/api/models").await;
        assert_eq!(body.as_array().unwrap().len(), 2);
        let (_, body) = get_json(&state, "/api/models?format=onnx").await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["id"], "custom");

        let (status, body) = get_json(&state, "/api/models/job_a").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["file_name"], "best.pt");
        assert_eq!(body["file_size"], 7);

        let (status, _) = get_json(&state, "/api/models/job_missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get_json(&state, "/api/models/..").await;
        assert!(status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_download_streams_weights() {
        let (_tmp, state) = test_state().await;
        write_model(&state.models_dir, "job_a", b"weights-bytes");

        let response = crate::create_app(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/models/job_a/download")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"job_a.pt\""
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"weights-bytes");
    }

    #[tokio::test]
    async fn test_delete_refused_while_owner_runs() {
        let (tmp, state) = test_state().await;
        let (_, job) = send_json(
            &state,
            Method::POST,
            "/api/jobs",
            json!({"name": "long", "dataset_path": dataset_dir(&tmp), "config": {"epochs": 500}}),
        )
        .await;
        let id = job["id"].as_str().unwrap().to_string();
        write_model(&state.models_dir, &id, b"old weights");

        state.jobs.start_job(&id).await.unwrap();
        let uri = format!("/api/models/{id}");
        let (status, _) = send_json(&state, Method::DELETE, &uri, json!({})).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(state.models_dir.join(&id).exists());

        state.jobs.cancel_job(&id).await.unwrap();
        wait_for(&state, &id, JobStatus::Cancelled).await;
        let (status, body) = send_json(&state, Method::DELETE, &uri, json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], true);
        assert!(!state.models_dir.join(&id).exists());

        let (status, _) = send_json(&state, Method::DELETE, &uri, json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
