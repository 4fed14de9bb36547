// crates/server/src/state.rs
//! Application state for the Axum server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::jobs::JobManager;
use crate::sse::BroadcastHub;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job lifecycle owner; handlers never mutate jobs directly.
    pub jobs: Arc<JobManager>,
    /// Fan-out for `/stream` endpoints.
    pub hub: Arc<BroadcastHub>,
    /// Bearer token required on `/api` routes, if any.
    pub api_secret: Option<String>,
    pub models_dir: PathBuf,
    pub datasets_dir: PathBuf,
}

impl AppState {
    pub fn new(jobs: Arc<JobManager>, config: &ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            hub: Arc::clone(jobs.hub()),
            jobs,
            api_secret: config.api_secret.clone(),
            models_dir: config.models_dir(),
            datasets_dir: config.datasets_dir(),
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
