// crates/server/src/jobs/manager.rs
//! Job lifecycle orchestration.
//!
//! The manager is the only writer of the job table and the event logs.
//! Every mutation happens inside one short, non-suspending critical
//! section; persistence and broadcasting happen after the lock is
//! released. Admission ("count running, compare with the limit, mark
//! running") is a single critical section, so concurrent starts can never
//! exceed the cap.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use visiontrain_core::{
    analyze_dataset, EventType, Job, JobCreateRequest, JobStats, JobStatus, ProgressEvent,
    TrainingMetrics,
};

use super::error::{JobError, StoreError};
use super::events::EventLog;
use super::runner::spawn_execution;
use super::store::JobStore;
use super::types::{ExecutionOutcome, JobHandle};
use crate::metrics;
use crate::sse::{BroadcastHub, StreamMessage, Topic};
use crate::training::Trainer;

/// Recorded on jobs found `running` when the table is loaded.
pub const RESTART_ERROR: &str = "Server restarted while the job was running";

/// Default number of jobs returned by a listing.
pub const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, Job>,
    events: HashMap<String, EventLog>,
    active: HashMap<String, JobHandle>,
}

impl JobTable {
    fn running_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count()
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = format!("job_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
            if !self.jobs.contains_key(&id) {
                return id;
            }
        }
    }
}

pub struct JobManager {
    store: JobStore,
    trainer: Arc<dyn Trainer>,
    hub: Arc<BroadcastHub>,
    max_concurrent_jobs: usize,
    table: Mutex<JobTable>,
}

impl JobManager {
    /// Load the persisted table and build the manager.
    ///
    /// Jobs left `running` by a previous process are marked `failed`. An
    /// unreadable table is moved aside and the manager starts empty.
    pub async fn open(
        store: JobStore,
        trainer: Arc<dyn Trainer>,
        hub: Arc<BroadcastHub>,
        max_concurrent_jobs: usize,
    ) -> Result<Arc<Self>, StoreError> {
        let loaded = match store.load().await {
            Ok(jobs) => jobs,
            Err(e @ StoreError::Corrupt { .. }) => {
                tracing::error!(error = %e, "Job table unreadable; starting empty");
                let moved = store.quarantine().await?;
                tracing::warn!(path = %moved.display(), "Moved unreadable job table aside");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut table = JobTable::default();
        let mut corrected = 0usize;
        for mut job in loaded {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Failed;
                job.error_message = Some(RESTART_ERROR.to_string());
                corrected += 1;
                tracing::warn!(job_id = %job.id, "Marking interrupted job as failed");
            }
            table.jobs.insert(job.id.clone(), job);
        }
        tracing::info!(
            jobs = table.jobs.len(),
            corrected,
            path = %store.path().display(),
            "Loaded job table"
        );

        let manager = Arc::new(Self {
            store,
            trainer,
            hub,
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            table: Mutex::new(table),
        });
        if corrected > 0 {
            manager.persist().await;
        }
        Ok(manager)
    }

    fn lock(&self) -> MutexGuard<'_, JobTable> {
        self.table.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Job table mutex poisoned; recovering");
            poisoned.into_inner()
        })
    }

    pub(crate) fn trainer(&self) -> Arc<dyn Trainer> {
        Arc::clone(&self.trainer)
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    /// Validate the request, analyze its dataset and store a `pending` job.
    pub async fn create_job(&self, request: JobCreateRequest) -> Result<Job, JobError> {
        request.validate()?;
        let path = PathBuf::from(request.dataset_path.trim());
        let dataset = tokio::task::spawn_blocking(move || analyze_dataset(&path))
            .await
            .map_err(|e| JobError::InvalidInput(format!("Dataset analysis aborted: {e}")))??;

        let job = {
            let mut table = self.lock();
            let id = table.fresh_id();
            let job = Job::new(
                id.clone(),
                request.name.trim(),
                request.config,
                dataset,
                Utc::now(),
            );
            table.jobs.insert(id, job.clone());
            job
        };

        tracing::info!(
            job_id = %job.id,
            dataset = %job.dataset.name,
            classes = job.dataset.classes.len(),
            epochs = job.config.epochs,
            "Job created"
        );
        metrics::record_job_created();
        metrics::record_job_transition(JobStatus::Pending);
        self.publish_job_update(&job.id, "created", json!({ "job": job }));
        self.persist().await;
        Ok(job)
    }

    /// Admit a `pending` job and launch its execution unit.
    pub async fn start_job(self: &Arc<Self>, id: &str) -> Result<Job, JobError> {
        let (job, token) = {
            let mut table = self.lock();
            let running = table.running_count();
            let job = table
                .jobs
                .get_mut(id)
                .ok_or_else(|| JobError::NotFound(id.to_string()))?;
            if job.status != JobStatus::Pending {
                return Err(JobError::InvalidState {
                    id: id.to_string(),
                    status: job.status,
                    action: "start",
                });
            }
            if running >= self.max_concurrent_jobs {
                return Err(JobError::CapacityExceeded {
                    limit: self.max_concurrent_jobs,
                });
            }
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            let snapshot = job.clone();

            let handle = JobHandle::new(id);
            let token = handle.token();
            table.active.insert(id.to_string(), handle);
            metrics::set_jobs_running(running + 1);
            (snapshot, token)
        };

        tracing::info!(job_id = %id, trainer = self.trainer.id(), "Job started");
        metrics::record_job_transition(JobStatus::Running);
        self.publish_job_update(id, "started", json!({ "status": JobStatus::Running }));
        self.persist().await;

        // The launch runs detached so an abandoned caller cannot strand
        // the job in `running` with no execution unit.
        let launched = spawn_execution(Arc::clone(self), job.clone(), token);
        match launched.await {
            Ok(Ok(())) => Ok(self.get_job(id).unwrap_or(job)),
            Ok(Err(message)) => Err(JobError::RunnerFailure(message)),
            Err(_) => Err(JobError::RunnerFailure("training launch aborted".into())),
        }
    }

    /// Cancel a `pending` or `running` job. Already-terminal jobs are
    /// returned unchanged.
    pub async fn cancel_job(&self, id: &str) -> Result<Job, JobError> {
        let (job, previous) = {
            let mut table = self.lock();
            let job = table
                .jobs
                .get_mut(id)
                .ok_or_else(|| JobError::NotFound(id.to_string()))?;
            if job.status.is_terminal() {
                return Ok(job.clone());
            }
            let previous = job.status;
            job.status = JobStatus::Cancelled;
            job.completed_at.get_or_insert_with(Utc::now);
            let snapshot = job.clone();

            if let Some(handle) = table.active.get(id) {
                handle.cancel();
            }
            metrics::set_jobs_running(table.running_count());
            (snapshot, previous)
        };

        tracing::info!(job_id = %id, previous = %previous, "Job cancelled");
        metrics::record_job_transition(JobStatus::Cancelled);
        self.publish_job_update(
            id,
            EventType::Cancelled.as_str(),
            json!({ "previous_status": previous }),
        );
        self.persist().await;
        Ok(job)
    }

    /// Remove a job that is not running, together with its event log.
    pub async fn delete_job(&self, id: &str) -> Result<Job, JobError> {
        let job = {
            let mut table = self.lock();
            let status = table
                .jobs
                .get(id)
                .map(|j| j.status)
                .ok_or_else(|| JobError::NotFound(id.to_string()))?;
            if status == JobStatus::Running {
                return Err(JobError::InvalidState {
                    id: id.to_string(),
                    status,
                    action: "delete",
                });
            }
            table.events.remove(id);
            table
                .jobs
                .remove(id)
                .ok_or_else(|| JobError::NotFound(id.to_string()))?
        };

        self.hub.forget_job(id);
        tracing::info!(job_id = %id, "Job deleted");
        self.persist().await;
        Ok(job)
    }

    /// Pause is not part of the job state machine.
    pub fn pause_job(&self, id: &str) -> Result<Job, JobError> {
        self.require(id)?;
        Err(JobError::NotImplemented("Pausing a job"))
    }

    pub fn resume_job(&self, id: &str) -> Result<Job, JobError> {
        self.require(id)?;
        Err(JobError::NotImplemented("Resuming a job"))
    }

    fn require(&self, id: &str) -> Result<Job, JobError> {
        self.get_job(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.lock().jobs.get(id).cloned()
    }

    /// Newest first, optionally filtered by status, truncated to `limit`.
    pub fn list_jobs(&self, status: Option<JobStatus>, limit: Option<usize>) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .lock()
            .jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        jobs.truncate(limit.unwrap_or(DEFAULT_LIST_LIMIT));
        jobs
    }

    pub fn running_jobs(&self) -> Vec<Job> {
        self.list_jobs(Some(JobStatus::Running), Some(usize::MAX))
    }

    pub fn get_stats(&self) -> JobStats {
        JobStats::from_jobs(self.lock().jobs.values())
    }

    /// The job's event log, oldest first. Empty for unknown jobs.
    pub fn get_job_events(&self, id: &str) -> Vec<ProgressEvent> {
        self.lock()
            .events
            .get(id)
            .map(EventLog::to_vec)
            .unwrap_or_default()
    }

    pub fn latest_metrics_event(&self, id: &str) -> Option<ProgressEvent> {
        self.lock()
            .events
            .get(id)
            .and_then(|log| log.latest_metrics().cloned())
    }

    /// Fold one reported epoch into a running job.
    ///
    /// Reports for jobs that are no longer running are dropped.
    pub(crate) async fn record_progress(&self, id: &str, reported: TrainingMetrics) {
        let reported = reported.without_non_finite();
        let message = {
            let mut table = self.lock();
            let JobTable { jobs, events, .. } = &mut *table;
            let Some(job) = jobs.get_mut(id) else {
                return;
            };
            if job.status != JobStatus::Running {
                tracing::debug!(job_id = %id, status = %job.status, "Ignoring progress for inactive job");
                return;
            }
            job.apply_metrics(reported.clone());
            events
                .entry(id.to_string())
                .or_default()
                .push(ProgressEvent::metrics(id, &reported));

            let mut message = StreamMessage::training_metrics(id, &reported);
            if let Some(Value::Object(data)) = &mut message.data {
                data.insert("current_epoch".into(), job.current_epoch.into());
                data.insert("progress_percent".into(), job.progress_percent.into());
            }
            message
        };

        tracing::debug!(
            job_id = %id,
            epoch = reported.epoch,
            total = reported.total_epochs,
            train_loss = reported.train_loss,
            "Epoch reported"
        );
        self.hub.publish(Topic::Training, Some(id), &message);
        self.persist().await;
    }

    /// Terminal bookkeeping for an execution unit. Always runs once per
    /// admitted job; never overrides a status already made terminal.
    pub(crate) async fn finish_job(&self, id: &str, outcome: ExecutionOutcome) {
        let update = {
            let mut table = self.lock();
            let handle = table.active.remove(id);
            let JobTable { jobs, events, .. } = &mut *table;

            let update = match jobs.get_mut(id) {
                Some(job) if job.status == JobStatus::Running => {
                    let (status, event) = match outcome {
                        ExecutionOutcome::Completed(artifacts) => {
                            job.model_path = artifacts.model_path;
                            job.weights_path = artifacts.weights_path;
                            job.logs_path = artifacts.logs_path;
                            job.best_metrics = artifacts.best_metrics.map(|mut best| {
                                best.retain(|_, v| v.is_finite());
                                best
                            });
                            let data = json!({
                                "model_path": job.model_path,
                                "weights_path": job.weights_path,
                                "logs_path": job.logs_path,
                                "best_metrics": job.best_metrics,
                            });
                            (JobStatus::Completed, Some((EventType::Completed, data)))
                        }
                        ExecutionOutcome::Failed(message) => {
                            let data = json!({ "error": message });
                            job.error_message = Some(message);
                            (JobStatus::Failed, Some((EventType::Error, data)))
                        }
                        ExecutionOutcome::Cancelled => (JobStatus::Cancelled, None),
                    };
                    job.status = status;
                    job.completed_at.get_or_insert_with(Utc::now);

                    let (event_type, data) = match event {
                        Some((event_type, data)) => {
                            let payload = match &data {
                                Value::Object(map) => map.clone(),
                                _ => Default::default(),
                            };
                            events
                                .entry(id.to_string())
                                .or_default()
                                .push(ProgressEvent::new(id, event_type, payload));
                            (event_type, data)
                        }
                        None => (EventType::Cancelled, json!({})),
                    };

                    metrics::record_job_finished(status, handle.map(|h| h.started.elapsed()));
                    match status {
                        JobStatus::Failed => tracing::warn!(
                            job_id = %id,
                            error = job.error_message.as_deref().unwrap_or_default(),
                            "Job failed"
                        ),
                        _ => tracing::info!(job_id = %id, status = %status, "Job finished"),
                    }
                    Some((event_type, data))
                }
                Some(job) => {
                    tracing::debug!(job_id = %id, status = %job.status, "Execution unit ended after job left running");
                    None
                }
                None => None,
            };
            metrics::set_jobs_running(table.running_count());
            update
        };

        if let Some((event_type, data)) = update {
            self.publish_job_update(id, event_type.as_str(), data);
        }
        self.persist().await;
    }

    /// Signal every live execution unit and wait up to `grace` for them to
    /// finish, then persist.
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<JobHandle> = self.lock().active.values().cloned().collect();
        for handle in &handles {
            handle.cancel();
        }
        if !handles.is_empty() {
            tracing::info!(jobs = handles.len(), "Cancelling running jobs for shutdown");
        }

        let deadline = tokio::time::Instant::now() + grace;
        let remaining = loop {
            let remaining = self.lock().active.len();
            if remaining == 0 || tokio::time::Instant::now() >= deadline {
                break remaining;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        };
        if remaining > 0 {
            tracing::warn!(remaining, "Execution units still running at shutdown");
        }
        self.persist().await;
    }

    fn publish_job_update(&self, id: &str, event_type: &str, data: Value) {
        self.hub.publish(
            Topic::Jobs,
            Some(id),
            &StreamMessage::job_update(id, event_type, data),
        );
    }

    fn snapshot(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Write the whole table. Failures are logged and counted, never
    /// returned.
    async fn persist(&self) {
        if let Err(e) = self.store.save_with(|| self.snapshot()).await {
            tracing::error!(
                error = %e,
                path = %self.store.path().display(),
                "Failed to persist job table"
            );
            metrics::record_persist_failure();
        }
    }
}
