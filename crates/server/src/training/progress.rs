// crates/server/src/training/progress.rs
use tokio::sync::mpsc;
use visiontrain_core::TrainingMetrics;

/// Sending half of a trainer's progress channel.
///
/// Unbounded so that a trainer running on a blocking thread never stalls
/// on the async side; volume is one message per epoch.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<TrainingMetrics>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TrainingMetrics>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report a finished epoch. Returns `false` once nobody is listening.
    pub fn report(&self, metrics: TrainingMetrics) -> bool {
        self.tx.send(metrics).is_ok()
    }
}
