// crates/server/src/training/mod.rs
//! The seam between job orchestration and the code that actually trains.
//!
//! A [`Trainer`] runs one job to completion, reporting each finished epoch
//! through a [`ProgressReporter`] and watching a cancellation token. The
//! job manager owns every status transition; trainers only report.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use visiontrain_core::Job;

pub mod progress;
pub mod simulated;
pub mod yolo;

pub use progress::ProgressReporter;
pub use simulated::SimulatedTrainer;
pub use yolo::YoloTrainer;

/// Files and summary numbers produced by a successful run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingArtifacts {
    pub model_path: Option<String>,
    pub weights_path: Option<String>,
    pub logs_path: Option<String>,
    pub best_metrics: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Error)]
pub enum TrainerError {
    /// The run failed; the message is recorded on the job verbatim.
    #[error("{0}")]
    Failed(String),

    #[error("training cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[async_trait]
pub trait Trainer: Send + Sync {
    fn id(&self) -> &'static str;

    /// Launch-time setup, run after the job is admitted to `running`.
    /// An error here fails the job before any epoch runs.
    async fn prepare(&self, _job: &Job) -> Result<(), TrainerError> {
        Ok(())
    }

    /// Train `job`, reporting each completed epoch. Should return
    /// [`TrainerError::Cancelled`] promptly once `cancel` fires.
    async fn train(
        &self,
        job: &Job,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<TrainingArtifacts, TrainerError>;
}
