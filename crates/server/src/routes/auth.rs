// crates/server/src/routes/auth.rs
//! Optional bearer-token check for `/api` routes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Paths reachable without a token even when a secret is configured.
const PUBLIC_PATHS: [&str; 2] = ["/api/health", "/metrics"];

/// Reject requests without `Authorization: Bearer <secret>`.
///
/// A no-op when no secret is configured.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(secret) = state.api_secret.as_deref() else {
        return Ok(next.run(request).await);
    };
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let matches = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| tokens_match(token.trim(), secret));

    match matches {
        Some(true) => Ok(next.run(request).await),
        Some(false) => {
            tracing::warn!(path = %request.uri().path(), "Rejected request with invalid API token");
            Err(ApiError::Unauthorized)
        }
        None => {
            tracing::debug!(path = %request.uri().path(), "Rejected request without API token");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Byte comparison whose running time depends only on the lengths.
fn tokens_match(presented: &str, secret: &str) -> bool {
    let (a, b) = (presented.as_bytes(), secret.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
