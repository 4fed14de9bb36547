// crates/server/src/training/simulated.rs
//! Synthetic trainer: sleeps per epoch and reports plausible curves.
//!
//! Used when no Python toolchain is available and throughout the tests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use visiontrain_core::{Job, TrainingMetrics};

use super::{ProgressReporter, Trainer, TrainerError, TrainingArtifacts};

#[derive(Debug, Clone)]
pub struct SimulatedTrainer {
    epoch_delay: Duration,
    fail_at_epoch: Option<u32>,
    models_dir: Option<PathBuf>,
}

impl SimulatedTrainer {
    pub fn new(epoch_delay: Duration) -> Self {
        Self {
            epoch_delay,
            fail_at_epoch: None,
            models_dir: None,
        }
    }

    /// Fail the run with an error once `epoch` is reached.
    pub fn fail_at_epoch(mut self, epoch: u32) -> Self {
        self.fail_at_epoch = Some(epoch);
        self
    }

    /// Write placeholder `best.pt` / `results.csv` under `<dir>/<job id>/`.
    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl Trainer for SimulatedTrainer {
    fn id(&self) -> &'static str {
        "simulated"
    }

    async fn train(
        &self,
        job: &Job,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<TrainingArtifacts, TrainerError> {
        let this = self.clone();
        let job_id = job.id.clone();
        let epochs = job.config.epochs;
        let base_lr = job.config.learning_rate;

        tokio::task::spawn_blocking(move || {
            let mut history = Vec::with_capacity(epochs as usize);
            for epoch in 1..=epochs {
                if cancel.is_cancelled() {
                    return Err(TrainerError::Cancelled);
                }
                std::thread::sleep(this.epoch_delay);
                if this.fail_at_epoch == Some(epoch) {
                    return Err(TrainerError::Failed(format!(
                        "simulated failure at epoch {epoch}"
                    )));
                }
                let remaining = this.epoch_delay * (epochs - epoch);
                let metrics = synthetic_metrics(epoch, epochs, base_lr, remaining);
                history.push(metrics.clone());
                if !progress.report(metrics) {
                    return Err(TrainerError::Cancelled);
                }
            }
            this.finish(&job_id, &history)
        })
        .await
        .map_err(|e| TrainerError::Failed(format!("simulated trainer aborted: {e}")))?
    }
}

impl SimulatedTrainer {
    fn finish(
        &self,
        job_id: &str,
        history: &[TrainingMetrics],
    ) -> Result<TrainingArtifacts, TrainerError> {
        let best_metrics = history
            .iter()
            .max_by(|a, b| a.map50.unwrap_or(0.0).total_cmp(&b.map50.unwrap_or(0.0)))
            .map(|best| {
                BTreeMap::from([
                    ("map50".to_string(), best.map50.unwrap_or(0.0)),
                    ("map50_95".to_string(), best.map50_95.unwrap_or(0.0)),
                    ("precision".to_string(), best.precision.unwrap_or(0.0)),
                    ("recall".to_string(), best.recall.unwrap_or(0.0)),
                    ("final_loss".to_string(), best.train_loss),
                ])
            });

        let Some(models_dir) = &self.models_dir else {
            return Ok(TrainingArtifacts {
                best_metrics,
                ..Default::default()
            });
        };

        let dir = models_dir.join(job_id);
        std::fs::create_dir_all(&dir)?;
        let model = dir.join("best.pt");
        std::fs::write(&model, b"simulated weights\n")?;

        let mut csv = String::from("epoch,train_loss,val_loss,map50,map50_95\n");
        for m in history {
            csv.push_str(&format!(
                "{},{:.5},{:.5},{:.5},{:.5}\n",
                m.epoch,
                m.train_loss,
                m.val_loss.unwrap_or(0.0),
                m.map50.unwrap_or(0.0),
                m.map50_95.unwrap_or(0.0)
            ));
        }
        let logs = dir.join("results.csv");
        std::fs::write(&logs, csv)?;

        let model = model.display().to_string();
        Ok(TrainingArtifacts {
            model_path: Some(model.clone()),
            weights_path: Some(model),
            logs_path: Some(logs.display().to_string()),
            best_metrics,
        })
    }
}

fn synthetic_metrics(
    epoch: u32,
    total: u32,
    base_lr: f64,
    remaining: Duration,
) -> TrainingMetrics {
    let t = f64::from(epoch) / f64::from(total.max(1));
    let train_loss = 2.5 * (-3.0 * t).exp() + 0.15;
    let map50 = 0.85 * (1.0 - (-4.0 * t).exp());
    TrainingMetrics {
        epoch,
        total_epochs: total,
        train_loss,
        val_loss: Some(train_loss * 1.1),
        precision: Some((map50 + 0.05).min(1.0)),
        recall: Some(map50 * 0.95),
        map50: Some(map50),
        map50_95: Some(map50 * 0.6),
        learning_rate: base_lr * (1.0 - 0.9 * t),
        eta: Some(format_eta(remaining)),
        ..Default::default()
    }
}

fn format_eta(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, s) => format!("{s}s"),
        (0, m, s) => format!("{m}m {s}s"),
        (h, m, _) => format!("{h}h {m}m"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;
    use visiontrain_core::{DatasetInfo, TrainingConfig};

    fn job(epochs: u32) -> Job {
        Job::new(
            "job_sim00001",
            "sim",
            TrainingConfig {
                epochs,
                ..Default::default()
            },
            DatasetInfo {
                name: "d".into(),
                path: "/tmp/d".into(),
                classes: vec!["a".into()],
                train_images: 1,
                val_images: 1,
                test_images: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_reports_every_epoch_and_writes_artifacts() {
        let tmp = TempDir::new().unwrap();
        let trainer = SimulatedTrainer::new(Duration::ZERO).with_models_dir(tmp.path());
        let (reporter, mut rx) = ProgressReporter::channel();

        let artifacts = trainer
            .train(&job(3), reporter, CancellationToken::new())
            .await
            .unwrap();

        let epochs: Vec<u32> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.epoch)
            .collect();
        assert_eq!(epochs, vec![1, 2, 3]);
        let model = artifacts.model_path.unwrap();
        assert!(model.ends_with("job_sim00001/best.pt"));
        assert!(std::path::Path::new(&model).exists());
        assert!(artifacts.best_metrics.unwrap().contains_key("map50"));
    }

    #[tokio::test]
    async fn test_failure_epoch() {
        let trainer = SimulatedTrainer::new(Duration::ZERO).fail_at_epoch(2);
        let (reporter, mut rx) = ProgressReporter::channel();
        let err = trainer
            .train(&job(5), reporter, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "simulated failure at epoch 2");
        assert_eq!(rx.try_recv().unwrap().epoch, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_before_first_epoch() {
        let trainer = SimulatedTrainer::new(Duration::ZERO);
        let (reporter, _rx) = ProgressReporter::channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = trainer.train(&job(5), reporter, cancel).await.unwrap_err();
        assert!(matches!(err, TrainerError::Cancelled));
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(Duration::from_secs(42)), "42s");
        assert_eq!(format_eta(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_eta(Duration::from_secs(7260)), "2h 1m");
    }
}
