// crates/server/src/jobs/events.rs
use std::collections::VecDeque;

use visiontrain_core::{EventType, ProgressEvent};

/// Maximum events retained per job; older entries are dropped first.
pub const MAX_EVENTS_PER_JOB: usize = 1000;

/// Bounded, append-only history of one job's progress events.
#[derive(Debug, Default)]
pub struct EventLog {
    events: VecDeque<ProgressEvent>,
}

impl EventLog {
    pub fn push(&mut self, event: ProgressEvent) {
        if self.events.len() == MAX_EVENTS_PER_JOB {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events oldest first.
    pub fn to_vec(&self) -> Vec<ProgressEvent> {
        self.events.iter().cloned().collect()
    }

    /// The newest `metrics` event, if any epoch has been reported.
    pub fn latest_metrics(&self) -> Option<&ProgressEvent> {
        self.events
            .iter()
            .rev()
            .find(|e| e.event_type == EventType::Metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use visiontrain_core::TrainingMetrics;

    fn metrics_event(epoch: u32) -> ProgressEvent {
        ProgressEvent::metrics(
            "job_1",
            &TrainingMetrics {
                epoch,
                total_epochs: 2000,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_cap_keeps_newest() {
        let mut log = EventLog::default();
        for epoch in 1..=1005 {
            log.push(metrics_event(epoch));
        }
        assert_eq!(log.len(), MAX_EVENTS_PER_JOB);
        let events = log.to_vec();
        assert_eq!(events[0].data["epoch"], 6);
        assert_eq!(events[999].data["epoch"], 1005);
    }

    #[test]
    fn test_latest_metrics_skips_terminal_events() {
        let mut log = EventLog::default();
        assert!(log.latest_metrics().is_none());
        log.push(metrics_event(1));
        log.push(metrics_event(2));
        log.push(ProgressEvent::new("job_1", EventType::Error, Default::default()));
        assert_eq!(log.latest_metrics().unwrap().data["epoch"], 2);
    }
}
