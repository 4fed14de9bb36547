// crates/server/src/jobs/store.rs
//! Durable job table: one JSON array in a single file.
//!
//! Writes go to a sibling temp file which is then renamed over the
//! target, so readers never observe a half-written table.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use visiontrain_core::Job;

use super::error::StoreError;

pub struct JobStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every persisted job. A missing file is an empty table.
    pub async fn load(&self) -> Result<Vec<Job>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Write the table produced by `snapshot`.
    ///
    /// `snapshot` runs after the write lock is held, so concurrent callers
    /// serialize and the last writer always persists the newest state.
    pub async fn save_with<F>(&self, snapshot: F) -> Result<usize, StoreError>
    where
        F: FnOnce() -> Vec<Job>,
    {
        let _guard = self.write_lock.lock().await;
        let jobs = snapshot();
        let bytes = serde_json::to_vec_pretty(&jobs)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(jobs.len())
    }

    /// Move an unreadable table aside so the next save does not clobber it.
    pub async fn quarantine(&self) -> Result<PathBuf, StoreError> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let target = self.path.with_extension(format!("json.corrupt-{stamp}"));
        tokio::fs::rename(&self.path, &target)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(target)
    }
}
