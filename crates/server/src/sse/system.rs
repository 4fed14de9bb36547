// crates/server/src/sse/system.rs
//! Periodic `system` topic snapshots.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{BroadcastHub, StreamMessage, Topic};
use crate::jobs::JobManager;

/// Publish job and subscriber counts on the `system` topic every
/// `interval` until `shutdown` fires.
pub fn spawn_system_publisher(
    jobs: Arc<JobManager>,
    hub: Arc<BroadcastHub>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = json!({
                        "jobs": jobs.get_stats(),
                        "max_concurrent_jobs": jobs.max_concurrent_jobs(),
                        "streams": hub.stats(),
                    });
                    hub.publish(Topic::System, None, &StreamMessage::system_update(snapshot));
                }
                _ = shutdown.cancelled() => break,
            }
        }
        tracing::debug!("System publisher stopped");
    })
}
