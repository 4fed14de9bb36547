// crates/server/src/lib.rs
//! Visiontrain server library.
//!
//! Job orchestration (store, event log, manager, execution units), the
//! broadcast hub behind the `/stream` endpoints, the trainer backends, the
//! model and dataset catalogue, and the Axum HTTP layer over them.

pub mod catalog;
pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod routes;
pub mod sse;
pub mod state;
pub mod training;

pub use config::{RunnerKind, ServerConfig};
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes under `/api` and `/metrics`
/// - CORS (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
