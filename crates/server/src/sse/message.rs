// crates/server/src/sse/message.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use visiontrain_core::TrainingMetrics;

/// Named broadcast channel a subscriber listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Jobs,
    System,
    Training,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Jobs, Topic::System, Topic::Training];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jobs => "jobs",
            Self::System => "system",
            Self::Training => "training",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jobs" => Ok(Self::Jobs),
            "system" => Ok(Self::System),
            "training" => Ok(Self::Training),
            other => Err(format!(
                "Invalid stream type '{other}'. Must be one of: jobs, system, training"
            )),
        }
    }
}

/// JSON payload carried by one SSE `data:` frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl StreamMessage {
    fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            job_id: None,
            event_type: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn connected(topic: Topic, job_id: Option<&str>) -> Self {
        Self {
            job_id: job_id.map(str::to_owned),
            data: Some(json!({ "connection_type": topic })),
            ..Self::new("connected")
        }
    }

    /// Snapshot replayed to a late joiner before live traffic.
    pub fn topic_state(topic: Topic, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(format!("{topic}_state"))
        }
    }

    pub fn heartbeat() -> Self {
        Self::new("heartbeat")
    }

    pub fn job_update(job_id: &str, event_type: &str, data: Value) -> Self {
        Self {
            job_id: Some(job_id.to_owned()),
            event_type: Some(event_type.to_owned()),
            data: Some(data),
            ..Self::new("job_update")
        }
    }

    pub fn training_metrics(job_id: &str, metrics: &TrainingMetrics) -> Self {
        Self {
            job_id: Some(job_id.to_owned()),
            event_type: Some("metrics".to_owned()),
            data: serde_json::to_value(metrics).ok(),
            ..Self::new("training_metrics")
        }
    }

    pub fn system_update(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new("system_update")
        }
    }

    pub fn server_shutdown() -> Self {
        Self {
            data: Some(json!({ "message": "Server is shutting down" })),
            ..Self::new("server_shutdown")
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
