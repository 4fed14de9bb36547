// crates/server/src/jobs/types.rs
//! Handles for in-flight execution units.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

/// Cancellation handle for a job's execution unit.
///
/// Present in the manager's active set from admission until the unit's
/// cleanup step runs.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: String,
    pub started: Instant,
    cancel: CancellationToken,
}

impl JobHandle {
    pub(crate) fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            started: Instant::now(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal cancellation. Returns `true` on the first call only.
    pub fn cancel(&self) -> bool {
        let first = !self.cancel.is_cancelled();
        self.cancel.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// How an execution unit ended.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed(crate::training::TrainingArtifacts),
    Failed(String),
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_handle_cancel() {
        let handle = JobHandle::new("job_1");
        let token = handle.token();
        assert!(!token.is_cancelled());
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(token.is_cancelled());
    }
}
