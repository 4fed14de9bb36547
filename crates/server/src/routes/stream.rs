// crates/server/src/routes/stream.rs
//! Generic topic streams.
//!
//! - GET /stream/{topic}?job_id= - SSE for `jobs`, `system` or `training`
//! - GET /stream/stats           - Subscriber counts

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tokio_stream::{Stream, StreamExt};

use crate::error::{ApiError, ApiResult};
use crate::sse::{HubStats, Topic};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub job_id: Option<String>,
}

/// Wrap a hub payload stream as a `text/event-stream` response.
///
/// The hub emits its own heartbeats, so axum's keep-alive comments are
/// left off.
pub(crate) fn sse_response<S>(payloads: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = String> + Send + 'static,
{
    Sse::new(payloads.map(|json| Ok(Event::default().data(json))))
}

/// GET /api/stream/{topic}
async fn stream_topic(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let topic: Topic = topic.parse().map_err(ApiError::BadRequest)?;
    Ok(sse_response(state.hub.stream(topic, query.job_id)))
}

/// GET /api/stream/stats
async fn stream_stats(State(state): State<Arc<AppState>>) -> Json<HubStats> {
    Json(state.hub.stats())
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stream/stats", get(stream_stats))
        .route("/stream/{topic}", get(stream_topic))
}
