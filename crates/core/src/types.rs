// crates/core/src/types.rs
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

/// Lifecycle status of a training job.
///
/// `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ValidationError::new(
                "status",
                format!("unknown job status '{other}'"),
            )),
        }
    }
}

/// Base model weights supported by the trainer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    #[default]
    #[serde(rename = "yolov8n.pt")]
    Yolov8n,
    #[serde(rename = "yolov8s.pt")]
    Yolov8s,
    #[serde(rename = "yolov8m.pt")]
    Yolov8m,
    #[serde(rename = "yolov8l.pt")]
    Yolov8l,
    #[serde(rename = "yolov8x.pt")]
    Yolov8x,
    #[serde(rename = "yolov9c.pt")]
    Yolov9c,
    #[serde(rename = "yolov9e.pt")]
    Yolov9e,
    #[serde(rename = "yolov10n.pt")]
    Yolov10n,
    #[serde(rename = "yolov10s.pt")]
    Yolov10s,
    #[serde(rename = "yolov10m.pt")]
    Yolov10m,
    #[serde(rename = "yolov10b.pt")]
    Yolov10b,
    #[serde(rename = "yolov10l.pt")]
    Yolov10l,
    #[serde(rename = "yolov10x.pt")]
    Yolov10x,
}

impl ModelType {
    /// Weight file name handed to the training library.
    pub fn weights_file(&self) -> &'static str {
        match self {
            Self::Yolov8n => "yolov8n.pt",
            Self::Yolov8s => "yolov8s.pt",
            Self::Yolov8m => "yolov8m.pt",
            Self::Yolov8l => "yolov8l.pt",
            Self::Yolov8x => "yolov8x.pt",
            Self::Yolov9c => "yolov9c.pt",
            Self::Yolov9e => "yolov9e.pt",
            Self::Yolov10n => "yolov10n.pt",
            Self::Yolov10s => "yolov10s.pt",
            Self::Yolov10m => "yolov10m.pt",
            Self::Yolov10b => "yolov10b.pt",
            Self::Yolov10l => "yolov10l.pt",
            Self::Yolov10x => "yolov10x.pt",
        }
    }
}

fn default_epochs() -> u32 {
    100
}

fn default_batch_size() -> u32 {
    16
}

fn default_image_size() -> u32 {
    640
}

fn default_learning_rate() -> f64 {
    0.01
}

fn default_optimizer() -> String {
    "AdamW".to_string()
}

fn default_workers() -> u32 {
    8
}

fn default_patience() -> u32 {
    50
}

fn default_save_period() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_mosaic() -> f64 {
    1.0
}

/// Training hyperparameters. Immutable once the job is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default)]
    pub base_model: ModelType,
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_optimizer")]
    pub optimizer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default = "default_workers")]
    pub workers: u32,
    #[serde(default = "default_patience")]
    pub patience: u32,
    #[serde(default = "default_save_period")]
    pub save_period: u32,

    #[serde(default = "default_true")]
    pub augment: bool,
    #[serde(default = "default_mosaic")]
    pub mosaic: f64,
    #[serde(default)]
    pub mixup: f64,
    #[serde(default)]
    pub copy_paste: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            base_model: ModelType::default(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            image_size: default_image_size(),
            learning_rate: default_learning_rate(),
            optimizer: default_optimizer(),
            device: None,
            workers: default_workers(),
            patience: default_patience(),
            save_period: default_save_period(),
            augment: true,
            mosaic: default_mosaic(),
            mixup: 0.0,
            copy_paste: 0.0,
        }
    }
}

fn check_unit_interval(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new(field, "must be between 0 and 1"))
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=1000).contains(&self.epochs) {
            return Err(ValidationError::new("epochs", "must be between 1 and 1000"));
        }
        if !(1..=128).contains(&self.batch_size) {
            return Err(ValidationError::new("batch_size", "must be between 1 and 128"));
        }
        if !(320..=1280).contains(&self.image_size) {
            return Err(ValidationError::new("image_size", "must be between 320 and 1280"));
        }
        if self.image_size % 32 != 0 {
            return Err(ValidationError::new("image_size", "must be a multiple of 32"));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(ValidationError::new("learning_rate", "must be in (0, 1]"));
        }
        if self.optimizer.trim().is_empty() {
            return Err(ValidationError::new("optimizer", "must not be empty"));
        }
        if !(1..=32).contains(&self.workers) {
            return Err(ValidationError::new("workers", "must be between 1 and 32"));
        }
        if self.patience == 0 {
            return Err(ValidationError::new("patience", "must be at least 1"));
        }
        if self.save_period == 0 {
            return Err(ValidationError::new("save_period", "must be at least 1"));
        }
        check_unit_interval("mosaic", self.mosaic)?;
        check_unit_interval("mixup", self.mixup)?;
        check_unit_interval("copy_paste", self.copy_paste)?;
        Ok(())
    }
}

/// Summary of a dataset directory, derived at job creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name: String,
    pub path: String,
    pub classes: Vec<String>,
    pub train_images: usize,
    pub val_images: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_images: Option<usize>,
}

/// Per-epoch metrics snapshot reported by a trainer.
///
/// Well-known fields are typed; anything else the trainer reports lands in
/// `extra` and is passed through untouched.
///
/// A diverged run reports a non-finite loss. JSON has no NaN, so it is
/// written as `null` and read back as NaN.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epoch: u32,
    pub total_epochs: u32,
    #[serde(deserialize_with = "f64_or_nan")]
    pub train_loss: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recall: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map50: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map50_95: Option<f64>,
    #[serde(deserialize_with = "f64_or_nan")]
    pub learning_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn f64_or_nan<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl TrainingMetrics {
    /// Drop optional readings that are NaN or infinite.
    pub fn without_non_finite(mut self) -> Self {
        for reading in [
            &mut self.val_loss,
            &mut self.precision,
            &mut self.recall,
            &mut self.map50,
            &mut self.map50_95,
        ] {
            if reading.is_some_and(|v| !v.is_finite()) {
                *reading = None;
            }
        }
        self
    }
}

/// A training job and everything known about its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub config: TrainingConfig,
    pub dataset: DatasetInfo,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub current_epoch: u32,
    #[serde(default)]
    pub progress_percent: f64,

    #[serde(default)]
    pub metrics: Option<TrainingMetrics>,
    #[serde(default)]
    pub best_metrics: Option<BTreeMap<String, f64>>,

    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default)]
    pub weights_path: Option<String>,
    #[serde(default)]
    pub logs_path: Option<String>,

    #[serde(default)]
    pub error_message: Option<String>,
}

impl Job {
    /// A fresh job in `Pending` with no progress.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        config: TrainingConfig,
        dataset: DatasetInfo,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: JobStatus::Pending,
            config,
            dataset,
            created_at,
            started_at: None,
            completed_at: None,
            current_epoch: 0,
            progress_percent: 0.0,
            metrics: None,
            best_metrics: None,
            model_path: None,
            weights_path: None,
            logs_path: None,
            error_message: None,
        }
    }

    /// Fold an epoch snapshot into the job's progress fields.
    ///
    /// `current_epoch` never exceeds the configured epoch count and
    /// `progress_percent` stays within [0, 100].
    pub fn apply_metrics(&mut self, metrics: TrainingMetrics) {
        let total = if metrics.total_epochs > 0 {
            metrics.total_epochs
        } else {
            self.config.epochs
        };
        self.current_epoch = metrics.epoch.min(self.config.epochs);
        self.progress_percent = if total == 0 {
            0.0
        } else {
            (100.0 * f64::from(metrics.epoch) / f64::from(total)).clamp(0.0, 100.0)
        };
        self.metrics = Some(metrics);
    }
}

/// Body of a job creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreateRequest {
    pub name: String,
    pub dataset_path: String,
    #[serde(default)]
    pub config: TrainingConfig,
}

impl JobCreateRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let len = self.name.chars().count();
        if len == 0 || len > 100 {
            return Err(ValidationError::new("name", "must be 1 to 100 characters"));
        }
        if self.dataset_path.trim().is_empty() {
            return Err(ValidationError::new("dataset_path", "must not be empty"));
        }
        self.config.validate()
    }
}

/// Job counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub active: usize,
}

impl JobStats {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut stats = Self::default();
        for job in jobs {
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats.active = stats.running;
        stats
    }
}

/// Kind of progress notification.
///
/// `Cancelled` is only ever broadcast; the per-job event log records
/// `Metrics`, `Completed` and `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Metrics,
    Completed,
    Error,
    Cancelled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One timestamped notification about a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub event_type: EventType,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        job_id: impl Into<String>,
        event_type: EventType,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            event_type,
            data,
            timestamp: Utc::now(),
        }
    }

    /// A `metrics` event carrying the snapshot's fields as its payload.
    pub fn metrics(job_id: impl Into<String>, metrics: &TrainingMetrics) -> Self {
        let data = match serde_json::to_value(metrics) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        Self::new(job_id, EventType::Metrics, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dataset() -> DatasetInfo {
        DatasetInfo {
            name: "birds".to_string(),
            path: "/data/datasets/birds".to_string(),
            classes: vec!["sparrow".into(), "crow".into(), "owl".into()],
            train_images: 120,
            val_images: 30,
            test_images: None,
        }
    }

    #[test]
    fn test_job_status_serde_lowercase() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let status: JobStatus = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(status, JobStatus::Running);
    }

    #[test]
    fn test_job_status_from_str() {
        assert_eq!("FAILED".parse::<JobStatus>().unwrap(), JobStatus::Failed);
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_model_type_serializes_as_weights_file() {
        let json = serde_json::to_string(&ModelType::Yolov10b).unwrap();
        assert_eq!(json, "\"yolov10b.pt\"");
        assert_eq!(ModelType::default().weights_file(), "yolov8n.pt");
    }

    #[test]
    fn test_training_config_defaults_from_empty_json() {
        let config: TrainingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TrainingConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_training_config_rejects_bad_image_size() {
        let config = TrainingConfig {
            image_size: 650,
            ..TrainingConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "image_size");
    }

    #[test]
    fn test_training_config_rejects_out_of_range_values() {
        let zero_epochs = TrainingConfig {
            epochs: 0,
            ..TrainingConfig::default()
        };
        assert_eq!(zero_epochs.validate().unwrap_err().field, "epochs");

        let big_mixup = TrainingConfig {
            mixup: 1.5,
            ..TrainingConfig::default()
        };
        assert_eq!(big_mixup.validate().unwrap_err().field, "mixup");

        let zero_lr = TrainingConfig {
            learning_rate: 0.0,
            ..TrainingConfig::default()
        };
        assert_eq!(zero_lr.validate().unwrap_err().field, "learning_rate");
    }

    #[test]
    fn test_create_request_validates_name() {
        let req = JobCreateRequest {
            name: String::new(),
            dataset_path: "/data".into(),
            config: TrainingConfig::default(),
        };
        assert_eq!(req.validate().unwrap_err().field, "name");

        let req = JobCreateRequest {
            name: "x".repeat(101),
            dataset_path: "/data".into(),
            config: TrainingConfig::default(),
        };
        assert_eq!(req.validate().unwrap_err().field, "name");
    }

    #[test]
    fn test_apply_metrics_progress() {
        let config = TrainingConfig {
            epochs: 50,
            batch_size: 8,
            ..TrainingConfig::default()
        };
        let mut job = Job::new("job_1", "birds", config, dataset(), Utc::now());
        job.apply_metrics(TrainingMetrics {
            epoch: 25,
            total_epochs: 50,
            train_loss: 0.4,
            learning_rate: 0.01,
            ..TrainingMetrics::default()
        });
        assert_eq!(job.current_epoch, 25);
        assert_eq!(job.progress_percent, 50.0);
        assert!(job.metrics.is_some());
    }

    #[test]
    fn test_apply_metrics_clamps_overshoot() {
        let config = TrainingConfig {
            epochs: 10,
            ..TrainingConfig::default()
        };
        let mut job = Job::new("job_2", "birds", config, dataset(), Utc::now());
        job.apply_metrics(TrainingMetrics {
            epoch: 12,
            total_epochs: 10,
            ..TrainingMetrics::default()
        });
        assert_eq!(job.current_epoch, 10);
        assert_eq!(job.progress_percent, 100.0);
    }

    #[test]
    fn test_metrics_extra_fields_pass_through() {
        let json = r#"{
            "epoch": 3, "total_epochs": 10, "train_loss": 0.5,
            "learning_rate": 0.001, "map50": 0.7, "cls_loss": 0.12
        }"#;
        let metrics: TrainingMetrics = serde_json::from_str(json).unwrap();
        assert_eq!(metrics.map50, Some(0.7));
        assert_eq!(metrics.extra.get("cls_loss"), Some(&serde_json::json!(0.12)));

        let out = serde_json::to_value(&metrics).unwrap();
        assert_eq!(out["cls_loss"], serde_json::json!(0.12));
        assert!(out.get("val_loss").is_none());
    }

    #[test]
    fn test_diverged_metrics_round_trip_through_json() {
        let metrics = TrainingMetrics {
            epoch: 7,
            total_epochs: 10,
            train_loss: f64::NAN,
            learning_rate: f64::INFINITY,
            map50: Some(f64::NAN),
            recall: Some(0.3),
            ..TrainingMetrics::default()
        }
        .without_non_finite();
        assert_eq!(metrics.map50, None);
        assert_eq!(metrics.recall, Some(0.3));

        let json = serde_json::to_string(&metrics).unwrap();
        assert!(json.contains("\"train_loss\":null"));
        let back: TrainingMetrics = serde_json::from_str(&json).unwrap();
        assert!(back.train_loss.is_nan());
        assert!(back.learning_rate.is_nan());
        assert_eq!(back.epoch, 7);
        assert!(back.extra.is_empty());
    }

    #[test]
    fn test_job_timestamps_serialize_iso8601() {
        let created = DateTime::parse_from_rfc3339("2026-03-01T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let job = Job::new("job_3", "birds", TrainingConfig::default(), dataset(), created);
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["created_at"], "2026-03-01T10:30:00Z");
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn test_job_stats_counts() {
        let mut a = Job::new("a", "a", TrainingConfig::default(), dataset(), Utc::now());
        let mut b = a.clone();
        let c = a.clone();
        a.status = JobStatus::Running;
        b.status = JobStatus::Failed;
        let stats = JobStats::from_jobs([&a, &b, &c]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn test_progress_event_metrics_payload() {
        let metrics = TrainingMetrics {
            epoch: 4,
            total_epochs: 8,
            train_loss: 0.25,
            learning_rate: 0.01,
            ..TrainingMetrics::default()
        };
        let event = ProgressEvent::metrics("job_9", &metrics);
        assert_eq!(event.event_type, EventType::Metrics);
        assert_eq!(event.data["epoch"], serde_json::json!(4));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"metrics\""));
    }
}
