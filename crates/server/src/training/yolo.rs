// crates/server/src/training/yolo.rs
//! Ultralytics YOLO training through a Python subprocess.
//!
//! The child runs a small embedded driver that calls `YOLO(...).train()`
//! and writes one marker-prefixed JSON line per finished epoch plus a
//! final result line to stdout. Everything else the child prints is
//! forwarded to the debug log.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use visiontrain_core::{Job, TrainingMetrics};

use super::{ProgressReporter, Trainer, TrainerError, TrainingArtifacts};

const LINE_MARKER: &str = "@@visiontrain ";
const STDERR_TAIL_LINES: usize = 20;

const DRIVER: &str = r#"
import json, math, sys
from ultralytics import YOLO

MARK = "@@visiontrain "
args = json.loads(sys.argv[1])

def emit(obj):
    sys.stdout.write(MARK + json.dumps(obj, allow_nan=False) + "\n")
    sys.stdout.flush()

def finite(v):
    if v is None:
        return None
    v = float(v)
    return v if math.isfinite(v) else None

def num(d, key):
    return finite(d.get(key))

def on_fit_epoch_end(trainer):
    m = dict(trainer.metrics or {})
    loss = trainer.tloss
    try:
        train_loss = finite(loss.sum()) if loss is not None else 0.0
    except Exception:
        train_loss = 0.0
    lr = trainer.optimizer.param_groups[0]["lr"] if trainer.optimizer else 0.0
    emit({
        "event": "epoch",
        "epoch": trainer.epoch + 1,
        "total_epochs": trainer.epochs,
        "train_loss": train_loss,
        "val_loss": num(m, "val/box_loss"),
        "precision": num(m, "metrics/precision(B)"),
        "recall": num(m, "metrics/recall(B)"),
        "map50": num(m, "metrics/mAP50(B)"),
        "map50_95": num(m, "metrics/mAP50-95(B)"),
        "learning_rate": finite(lr),
    })

model = YOLO(args["model"])
model.add_callback("on_fit_epoch_end", on_fit_epoch_end)
results = model.train(**args["train_args"])
rd = dict(getattr(results, "results_dict", None) or {})
best = {
    "map50": num(rd, "metrics/mAP50(B)"),
    "map50_95": num(rd, "metrics/mAP50-95(B)"),
    "precision": num(rd, "metrics/precision(B)"),
    "recall": num(rd, "metrics/recall(B)"),
}
emit({
    "event": "result",
    "save_dir": str(model.trainer.save_dir),
    "metrics": {k: v for k, v in best.items() if v is not None},
})
"#;

#[derive(Debug, Clone)]
pub struct YoloTrainer {
    python: String,
    outputs_dir: PathBuf,
    models_dir: PathBuf,
}

/// Argument document handed to the driver.
#[derive(Debug, Serialize)]
struct DriverArgs {
    model: &'static str,
    train_args: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum DriverLine {
    Epoch(TrainingMetrics),
    Result {
        save_dir: PathBuf,
        #[serde(default)]
        metrics: BTreeMap<String, f64>,
    },
}

impl YoloTrainer {
    pub fn new(
        python: impl Into<String>,
        outputs_dir: impl Into<PathBuf>,
        models_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            python: python.into(),
            outputs_dir: outputs_dir.into(),
            models_dir: models_dir.into(),
        }
    }

    fn job_dir(&self, job: &Job) -> PathBuf {
        self.outputs_dir.join(&job.id)
    }

    fn driver_args(&self, job: &Job) -> DriverArgs {
        let c = &job.config;
        let mut args = serde_json::Map::new();
        let mut set = |k: &str, v: serde_json::Value| {
            args.insert(k.to_string(), v);
        };
        set("data", self.job_dir(job).join("dataset.yaml").display().to_string().into());
        set("project", self.outputs_dir.display().to_string().into());
        set("name", job.id.clone().into());
        set("exist_ok", true.into());
        set("epochs", c.epochs.into());
        set("batch", c.batch_size.into());
        set("imgsz", c.image_size.into());
        set("lr0", c.learning_rate.into());
        set("optimizer", c.optimizer.clone().into());
        set("workers", c.workers.into());
        set("patience", c.patience.into());
        set("save_period", c.save_period.into());
        set("augment", c.augment.into());
        set("mosaic", c.mosaic.into());
        set("mixup", c.mixup.into());
        set("copy_paste", c.copy_paste.into());
        set("cache", false.into());
        set("verbose", false.into());
        if let Some(device) = &c.device {
            set("device", device.clone().into());
        }
        DriverArgs {
            model: c.base_model.weights_file(),
            train_args: args,
        }
    }

    async fn collect_artifacts(
        &self,
        job: &Job,
        save_dir: &Path,
        metrics: BTreeMap<String, f64>,
    ) -> Result<TrainingArtifacts, TrainerError> {
        let best = save_dir.join("weights").join("best.pt");
        if !tokio::fs::try_exists(&best).await.unwrap_or(false) {
            return Err(TrainerError::Failed(format!(
                "training finished without producing {}",
                best.display()
            )));
        }

        let dest = self.models_dir.join(&job.id);
        tokio::fs::create_dir_all(&dest).await?;
        let model = dest.join("best.pt");
        tokio::fs::copy(&best, &model).await?;

        let results_csv = save_dir.join("results.csv");
        let logs_path = if tokio::fs::try_exists(&results_csv).await.unwrap_or(false) {
            let logs = dest.join("results.csv");
            tokio::fs::copy(&results_csv, &logs).await?;
            Some(logs.display().to_string())
        } else {
            None
        };

        let model = model.display().to_string();
        Ok(TrainingArtifacts {
            model_path: Some(model.clone()),
            weights_path: Some(model),
            logs_path,
            best_metrics: (!metrics.is_empty()).then_some(metrics),
        })
    }
}

#[async_trait]
impl Trainer for YoloTrainer {
    fn id(&self) -> &'static str {
        "yolo"
    }

    /// Write `<outputs>/<job id>/dataset.yaml` with absolute split paths.
    async fn prepare(&self, job: &Job) -> Result<(), TrainerError> {
        let dir = self.job_dir(job);
        tokio::fs::create_dir_all(&dir).await?;
        let doc = dataset_config(job).await?;
        tokio::fs::write(dir.join("dataset.yaml"), serde_yaml::to_string(&doc)?).await?;
        Ok(())
    }

    async fn train(
        &self,
        job: &Job,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<TrainingArtifacts, TrainerError> {
        let args = serde_json::to_string(&self.driver_args(job))?;
        let mut child = Command::new(&self.python)
            .arg("-u")
            .arg("-c")
            .arg(DRIVER)
            .arg(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TrainerError::Failed(format!("failed to launch {}: {e}", self.python)))?;

        tracing::info!(job_id = %job.id, pid = ?child.id(), "Started YOLO training process");

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        if let Some(stderr) = child.stderr.take() {
            let tail = Arc::clone(&stderr_tail);
            let job_id = job.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(job_id = %job_id, "trainer: {line}");
                    if let Ok(mut tail) = tail.lock() {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrainerError::Failed("trainer stdout unavailable".into()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut result = None;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    let Some(json) = line.strip_prefix(LINE_MARKER) else {
                        tracing::debug!(job_id = %job.id, "trainer: {line}");
                        continue;
                    };
                    match serde_json::from_str::<DriverLine>(json) {
                        Ok(DriverLine::Epoch(metrics)) => {
                            progress.report(metrics);
                        }
                        Ok(DriverLine::Result { save_dir, metrics }) => {
                            result = Some((save_dir, metrics));
                        }
                        Err(e) => tracing::warn!(job_id = %job.id, "Unparsable trainer line: {e}"),
                    }
                }
                _ = cancel.cancelled() => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(job_id = %job.id, "Failed to kill training process: {e}");
                    }
                    return Err(TrainerError::Cancelled);
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let tail = stderr_tail
                .lock()
                .map(|t| t.iter().cloned().collect::<Vec<_>>().join("\n"))
                .unwrap_or_default();
            let message = tail
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(str::to_owned)
                .unwrap_or_else(|| format!("training process exited with {status}"));
            return Err(TrainerError::Failed(message));
        }

        let (save_dir, metrics) = result.ok_or_else(|| {
            TrainerError::Failed("training process exited without reporting results".into())
        })?;
        self.collect_artifacts(job, &save_dir, metrics).await
    }
}

/// Build the dataset YAML handed to Ultralytics.
///
/// An existing `data.yaml` is reused with its split paths made absolute;
/// otherwise one is synthesized from the analyzed class list.
async fn dataset_config(job: &Job) -> Result<serde_yaml::Value, TrainerError> {
    use serde_yaml::{Mapping, Value};

    let root = PathBuf::from(&job.dataset.path);
    let existing = root.join("data.yaml");

    if tokio::fs::try_exists(&existing).await.unwrap_or(false) {
        let mut doc: Value = serde_yaml::from_str(&tokio::fs::read_to_string(&existing).await?)?;
        if let Value::Mapping(map) = &mut doc {
            for split in ["train", "val", "test"] {
                if let Some(Value::String(rel)) = map.get(split) {
                    if Path::new(rel).is_relative() {
                        let abs = root.join(rel).display().to_string();
                        map.insert(Value::from(split), Value::from(abs));
                    }
                }
            }
            map.insert(Value::from("path"), Value::from(root.display().to_string()));
        }
        return Ok(doc);
    }

    let mut names = Mapping::new();
    for (i, class) in job.dataset.classes.iter().enumerate() {
        names.insert(Value::from(i as u64), Value::from(class.as_str()));
    }
    let images = root.join("images");
    let mut doc = Mapping::new();
    doc.insert("path".into(), Value::from(root.display().to_string()));
    doc.insert("train".into(), Value::from(images.join("train").display().to_string()));
    doc.insert("val".into(), Value::from(images.join("val").display().to_string()));
    if tokio::fs::try_exists(images.join("test")).await.unwrap_or(false) {
        doc.insert("test".into(), Value::from(images.join("test").display().to_string()));
    }
    doc.insert("names".into(), Value::Mapping(names));
    Ok(Value::Mapping(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;
    use visiontrain_core::{DatasetInfo, TrainingConfig};

    fn job(dataset: &Path) -> Job {
        Job::new(
            "job_yolo0001",
            "yolo",
            TrainingConfig {
                epochs: 3,
                device: Some("cpu".into()),
                ..Default::default()
            },
            DatasetInfo {
                name: "birds".into(),
                path: dataset.display().to_string(),
                classes: vec!["sparrow".into(), "crow".into()],
                train_images: 2,
                val_images: 1,
                test_images: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_driver_line_parsing() {
        let epoch: DriverLine = serde_json::from_str(
            r#"{"event":"epoch","epoch":2,"total_epochs":3,"train_loss":1.5,"map50":0.4,"learning_rate":0.01}"#,
        )
        .unwrap();
        match epoch {
            DriverLine::Epoch(m) => {
                assert_eq!(m.epoch, 2);
                assert_eq!(m.map50, Some(0.4));
                assert!(m.extra.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }

        let result: DriverLine = serde_json::from_str(
            r#"{"event":"result","save_dir":"/runs/job_1","metrics":{"map50":0.7}}"#,
        )
        .unwrap();
        assert!(matches!(result, DriverLine::Result { .. }));
    }

    #[test]
    fn test_driver_line_parsing_diverged_epoch() {
        let epoch: DriverLine = serde_json::from_str(
            r#"{"event":"epoch","epoch":4,"total_epochs":10,"train_loss":null,"val_loss":null,"map50":null,"learning_rate":0.01}"#,
        )
        .unwrap();
        match epoch {
            DriverLine::Epoch(m) => {
                assert_eq!(m.epoch, 4);
                assert!(m.train_loss.is_nan());
                assert_eq!(m.val_loss, None);
                assert_eq!(m.map50, None);
            }
            other => panic!("unexpected {other:?}"),
        }

        let result: DriverLine = serde_json::from_str(
            r#"{"event":"result","save_dir":"/runs/job_1","metrics":{"recall":0.5}}"#,
        )
        .unwrap();
        match result {
            DriverLine::Result { metrics, .. } => assert_eq!(metrics.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(DRIVER.contains("allow_nan=False"));
    }

    #[test]
    fn test_driver_args_maps_config() {
        let tmp = TempDir::new().unwrap();
        let trainer = YoloTrainer::new("python3", tmp.path().join("outputs"), tmp.path().join("models"));
        let args = trainer.driver_args(&job(tmp.path()));
        assert_eq!(args.model, "yolov8n.pt");
        assert_eq!(args.train_args["epochs"], 3);
        assert_eq!(args.train_args["imgsz"], 640);
        assert_eq!(args.train_args["device"], "cpu");
        assert_eq!(args.train_args["name"], "job_yolo0001");
        assert!(args.train_args["data"]
            .as_str()
            .unwrap()
            .ends_with("job_yolo0001/dataset.yaml"));
    }

    #[tokio::test]
    async fn test_prepare_synthesizes_dataset_yaml() {
        let tmp = TempDir::new().unwrap();
        let dataset = tmp.path().join("birds");
        std::fs::create_dir_all(dataset.join("images/train")).unwrap();
        let trainer = YoloTrainer::new("python3", tmp.path().join("outputs"), tmp.path().join("models"));

        trainer.prepare(&job(&dataset)).await.unwrap();

        let written = tmp.path().join("outputs/job_yolo0001/dataset.yaml");
        let doc: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(written).unwrap()).unwrap();
        assert_eq!(doc["names"][0].as_str(), Some("sparrow"));
        assert_eq!(doc["names"][1].as_str(), Some("crow"));
        assert!(doc.get("test").is_none());
    }

    #[tokio::test]
    async fn test_prepare_rewrites_relative_paths() {
        let tmp = TempDir::new().unwrap();
        let dataset = tmp.path().join("birds");
        std::fs::create_dir_all(&dataset).unwrap();
        std::fs::write(
            dataset.join("data.yaml"),
            "train: images/train\nval: /abs/val\nnames: [sparrow, crow]\n",
        )
        .unwrap();
        let trainer = YoloTrainer::new("python3", tmp.path().join("outputs"), tmp.path().join("models"));

        trainer.prepare(&job(&dataset)).await.unwrap();

        let written = tmp.path().join("outputs/job_yolo0001/dataset.yaml");
        let doc: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(written).unwrap()).unwrap();
        let expected = dataset.join("images/train").display().to_string();
        assert_eq!(doc["train"].as_str(), Some(expected.as_str()));
        assert_eq!(doc["val"].as_str(), Some("/abs/val"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_job() {
        let tmp = TempDir::new().unwrap();
        let trainer = YoloTrainer::new(
            "/nonexistent/python-for-visiontrain",
            tmp.path().join("outputs"),
            tmp.path().join("models"),
        );
        let (reporter, _rx) = ProgressReporter::channel();
        let err = trainer
            .train(&job(tmp.path()), reporter, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to launch"));
    }
}
