// crates/server/src/routes/datasets.rs
//! Dataset listing over the configured datasets directory.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use visiontrain_core::DatasetInfo;

use crate::catalog;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListDatasetsQuery {
    pub limit: Option<usize>,
}

/// GET /api/datasets - Analyzed subdirectories, sorted by name.
async fn list_datasets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListDatasetsQuery>,
) -> ApiResult<Json<Vec<DatasetInfo>>> {
    let mut datasets = catalog::list_datasets(&state.datasets_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to list datasets: {e}")))?;
    datasets.truncate(query.limit.unwrap_or(100));
    Ok(Json(datasets))
}

/// GET /api/datasets/{id}
async fn get_dataset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DatasetInfo>> {
    if !catalog::is_valid_entry_id(&id) {
        return Err(ApiError::BadRequest(format!("Invalid dataset id: {id}")));
    }
    catalog::dataset_info(&state.datasets_dir, &id)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Dataset {id} is unreadable: {e}")))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Dataset {id}")))
}

/// Create the dataset routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/datasets", get(list_datasets))
        .route("/datasets/{id}", get(get_dataset))
}
