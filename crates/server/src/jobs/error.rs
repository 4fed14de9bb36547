// crates/server/src/jobs/error.rs
use std::path::PathBuf;

use thiserror::Error;
use visiontrain_core::{DatasetError, JobStatus, ValidationError};

/// Failures surfaced by [`JobManager`](super::JobManager) operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Job {id} is {status}; cannot {action}")]
    InvalidState {
        id: String,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Maximum concurrent jobs ({limit}) reached")]
    CapacityExceeded { limit: usize },

    #[error("Training runner failed: {0}")]
    RunnerFailure(String),

    #[error(transparent)]
    PersistenceFailure(#[from] StoreError),

    #[error("{0} is not supported by the training runner")]
    NotImplemented(&'static str),
}

impl From<DatasetError> for JobError {
    fn from(e: DatasetError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

impl From<ValidationError> for JobError {
    fn from(e: ValidationError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

/// Errors reading or writing the persisted job table.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on job table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt job table {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode job table: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_dataset_errors_become_invalid_input() {
        let err: JobError = DatasetError::not_found(Path::new("/nope")).into();
        match err {
            JobError::InvalidInput(msg) => assert!(msg.contains("/nope")),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_state_message() {
        let err = JobError::InvalidState {
            id: "job_1234abcd".into(),
            status: JobStatus::Running,
            action: "delete",
        };
        assert_eq!(
            err.to_string(),
            "Job job_1234abcd is running; cannot delete"
        );
    }
}
