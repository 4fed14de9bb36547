// crates/server/src/config.rs
//! Environment-driven server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 8000;

/// Default cap on simultaneously running jobs.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;

/// Which [`Trainer`](crate::training::Trainer) drives job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    /// External Ultralytics training via a Python subprocess.
    Yolo,
    /// In-process synthetic epochs, for demos and tests.
    Simulated,
}

impl FromStr for RunnerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yolo" | "ultralytics" => Ok(Self::Yolo),
            "simulated" | "sim" => Ok(Self::Simulated),
            other => Err(format!("unknown runner '{other}' (expected 'yolo' or 'simulated')")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_concurrent_jobs: usize,
    pub runner: RunnerKind,
    pub python: String,
    pub sim_epoch_delay: Duration,
    /// Bearer token required on `/api` routes; `None` disables auth.
    pub api_secret: Option<String>,
    pub system_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            runner: RunnerKind::Yolo,
            python: "python3".to_string(),
            sim_epoch_delay: Duration::from_millis(500),
            api_secret: None,
            system_interval: Duration::from_secs(5),
        }
    }
}

/// `<platform data dir>/visiontrain`, or `./data` when the platform has none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("visiontrain"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

impl ServerConfig {
    /// Read configuration from `VISIONTRAIN_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unparsable values fall
    /// back to defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let host = parsed(&lookup, "VISIONTRAIN_HOST").unwrap_or(defaults.host);
        let port = parsed(&lookup, "VISIONTRAIN_PORT")
            .or_else(|| parsed(&lookup, "PORT"))
            .unwrap_or(defaults.port);
        let data_dir = lookup("VISIONTRAIN_DATA_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let max_concurrent_jobs = parsed::<usize>(&lookup, "VISIONTRAIN_MAX_CONCURRENT_JOBS")
            .unwrap_or(defaults.max_concurrent_jobs)
            .max(1);
        let runner = parsed(&lookup, "VISIONTRAIN_RUNNER").unwrap_or(defaults.runner);
        let python = lookup("VISIONTRAIN_PYTHON")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.python);
        let sim_epoch_delay = parsed(&lookup, "VISIONTRAIN_SIM_EPOCH_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.sim_epoch_delay);
        let api_secret = lookup("VISIONTRAIN_API_SECRET").filter(|s| !s.is_empty());
        let system_interval = parsed::<u64>(&lookup, "VISIONTRAIN_SYSTEM_INTERVAL_SECS")
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or(defaults.system_interval);

        Self {
            host,
            port,
            data_dir,
            max_concurrent_jobs,
            runner,
            python,
            sim_epoch_delay,
            api_secret,
            system_interval,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn jobs_file(&self) -> PathBuf {
        self.data_dir.join("jobs.json")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.data_dir.join("datasets")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.data_dir.join("outputs")
    }

    /// Create the data directory tree if missing.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.data_dir.clone(),
            self.models_dir(),
            self.datasets_dir(),
            self.outputs_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable config value");
            None
        }
    }
}
