// crates/server/src/metrics.rs
//! Prometheus metrics for the job lifecycle and the stream hub.
//!
//! Recording is a no-op until [`init_metrics`] installs the global
//! recorder, so library code and tests may call the helpers freely.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use visiontrain_core::JobStatus;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Returns `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("jobs_created_total", "Training jobs accepted by the API");
    describe_counter!(
        "job_transitions_total",
        "Job status transitions, labelled by the status entered"
    );
    describe_gauge!("jobs_running", "Jobs currently in the running state");
    describe_histogram!(
        "job_duration_seconds",
        "Wall time from start to terminal status"
    );
    describe_counter!(
        "job_store_persist_failures_total",
        "Failed writes of the job table"
    );

    describe_gauge!("sse_subscribers", "Live stream subscribers across all topics");
    describe_counter!(
        "sse_evictions_total",
        "Subscribers dropped because their mailbox was full or closed"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_job_created() {
    counter!("jobs_created_total").increment(1);
}

pub fn record_job_transition(status: JobStatus) {
    counter!("job_transitions_total", "status" => status.as_str()).increment(1);
}

pub fn record_job_finished(status: JobStatus, duration: Option<Duration>) {
    record_job_transition(status);
    if let Some(duration) = duration {
        histogram!("job_duration_seconds", "status" => status.as_str())
            .record(duration.as_secs_f64());
    }
}

pub fn set_jobs_running(count: usize) {
    gauge!("jobs_running").set(count as f64);
}

pub fn record_persist_failure() {
    counter!("job_store_persist_failures_total").increment(1);
}

pub fn set_sse_subscribers(count: usize) {
    gauge!("sse_subscribers").set(count as f64);
}

pub fn record_sse_evictions(count: usize) {
    if count > 0 {
        counter!("sse_evictions_total").increment(count as u64);
    }
}
