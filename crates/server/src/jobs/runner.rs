// crates/server/src/jobs/runner.rs
//! Execution unit: one background task per running job.
//!
//! The unit prepares the trainer, drives it, forwards each epoch to the
//! manager as it arrives, and always finishes through
//! [`JobManager::finish_job`], even if the trainer panics or the caller
//! that started the job goes away.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use visiontrain_core::Job;

use super::manager::JobManager;
use super::types::ExecutionOutcome;
use crate::training::{ProgressReporter, TrainerError};

/// Result of `Trainer::prepare`, sent once the launch is settled.
pub(crate) type LaunchResult = Result<(), String>;

/// Spawn the execution unit for an admitted job.
///
/// The returned receiver resolves after `prepare`. On a launch failure the
/// job is already `failed` when it resolves.
pub(crate) fn spawn_execution(
    manager: Arc<JobManager>,
    job: Job,
    cancel: CancellationToken,
) -> oneshot::Receiver<LaunchResult> {
    let (launched_tx, launched_rx) = oneshot::channel();
    tokio::spawn(async move {
        let job_id = job.id.clone();
        let trainer = manager.trainer();
        let prepared = match AssertUnwindSafe(trainer.prepare(&job)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(panic_message(panic.as_ref())),
        };
        if let Err(message) = prepared {
            tracing::error!(job_id = %job_id, error = %message, "Failed to launch training");
            manager
                .finish_job(&job_id, ExecutionOutcome::Failed(message.clone()))
                .await;
            let _ = launched_tx.send(Err(message));
            return;
        }
        let _ = launched_tx.send(Ok(()));

        let outcome = if cancel.is_cancelled() {
            // Cancelled while preparing; nothing to run.
            ExecutionOutcome::Cancelled
        } else {
            match AssertUnwindSafe(drive(&manager, &job, cancel))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(job_id = %job_id, "Training runner panicked: {message}");
                    ExecutionOutcome::Failed(message)
                }
            }
        };
        manager.finish_job(&job_id, outcome).await;
    });
    launched_rx
}

async fn drive(manager: &JobManager, job: &Job, cancel: CancellationToken) -> ExecutionOutcome {
    let (reporter, mut progress_rx) = ProgressReporter::channel();
    let trainer = manager.trainer();
    tracing::info!(job_id = %job.id, trainer = trainer.id(), "Training started");

    let result = {
        let train = trainer.train(job, reporter, cancel.clone());
        tokio::pin!(train);
        loop {
            tokio::select! {
                biased;
                Some(metrics) = progress_rx.recv() => {
                    manager.record_progress(&job.id, metrics).await;
                }
                _ = cancel.cancelled() => break Err(TrainerError::Cancelled),
                result = &mut train => break result,
            }
        }
    };

    // Epochs reported just before the trainer returned.
    while let Ok(metrics) = progress_rx.try_recv() {
        manager.record_progress(&job.id, metrics).await;
    }

    match result {
        Ok(artifacts) => ExecutionOutcome::Completed(artifacts),
        Err(TrainerError::Cancelled) => ExecutionOutcome::Cancelled,
        Err(e) => ExecutionOutcome::Failed(e.to_string()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "training runner panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(boxed.as_ref()), "owned boom");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "training runner panicked");
    }
}
