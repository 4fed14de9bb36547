// crates/server/src/sse/hub.rs
//! Topic fan-out for server-sent event streams.
//!
//! Every subscriber owns a bounded mailbox. Publishing never waits: a
//! mailbox that cannot accept a message is treated as dead and removed
//! from every set it belongs to, and its stream ends once drained.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use super::message::{StreamMessage, Topic};
use crate::metrics;

/// Messages buffered per subscriber before it is considered stalled.
pub const MAILBOX_CAPACITY: usize = 100;

/// Jobs kept per topic in the late-join cache; the least recently updated
/// entry goes first.
pub const MAX_CACHED_JOBS: usize = 256;

/// Idle interval after which a stream emits a heartbeat.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub type SubscriberId = u64;

type Mailboxes = HashMap<SubscriberId, mpsc::Sender<String>>;

#[derive(Default)]
struct HubInner {
    topics: HashMap<Topic, Mailboxes>,
    jobs: HashMap<String, Mailboxes>,
    last_state: HashMap<Topic, Value>,
    cache_order: HashMap<Topic, VecDeque<String>>,
    closed: bool,
}

impl HubInner {
    fn subscriber_count(&self) -> usize {
        self.topics
            .values()
            .flat_map(|m| m.keys())
            .chain(self.jobs.values().flat_map(|m| m.keys()))
            .collect::<HashSet<_>>()
            .len()
    }

    fn evict(&mut self, ids: &[SubscriberId]) {
        for mailboxes in self.topics.values_mut() {
            mailboxes.retain(|id, _| !ids.contains(id));
        }
        for mailboxes in self.jobs.values_mut() {
            mailboxes.retain(|id, _| !ids.contains(id));
        }
        self.jobs.retain(|_, m| !m.is_empty());
    }

    fn cache_job_state(&mut self, topic: Topic, job_id: &str, value: Value) {
        let cache = self
            .last_state
            .entry(topic)
            .or_insert_with(|| Value::Object(Default::default()));
        if !cache.is_object() {
            *cache = Value::Object(Default::default());
        }
        let Value::Object(map) = cache else {
            return;
        };
        map.insert(job_id.to_owned(), value);

        let order = self.cache_order.entry(topic).or_default();
        order.retain(|id| id != job_id);
        order.push_back(job_id.to_owned());
        while order.len() > MAX_CACHED_JOBS {
            if let Some(oldest) = order.pop_front() {
                map.remove(&oldest);
            }
        }
    }
}

/// One registered mailbox, returned by [`BroadcastHub::subscribe`].
pub struct Subscriber {
    pub id: SubscriberId,
    pub topic: Topic,
    pub job_id: Option<String>,
    pub rx: mpsc::Receiver<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HubStats {
    pub total_connections: usize,
    pub connections_by_type: BTreeMap<String, usize>,
    pub job_connections: BTreeMap<String, usize>,
    pub active_jobs: usize,
}

pub struct BroadcastHub {
    inner: Mutex<HubInner>,
    next_id: AtomicU64,
    heartbeat: Duration,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_heartbeat(HEARTBEAT_INTERVAL)
    }

    pub fn with_heartbeat(heartbeat: Duration) -> Self {
        Self {
            inner: Mutex::new(HubInner::default()),
            next_id: AtomicU64::new(1),
            heartbeat,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Broadcast hub mutex poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Register a mailbox under `topic` and, if given, under `job_id`.
    ///
    /// The mailbox starts with the topic's cached state (if any) followed
    /// by a `connected` message. After [`close`](Self::close) the returned
    /// receiver is already disconnected.
    pub fn subscribe(&self, topic: Topic, job_id: Option<String>) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

        let mut inner = self.lock();
        if !inner.closed {
            if let Some(state) = inner.last_state.get(&topic) {
                let _ = tx.try_send(StreamMessage::topic_state(topic, state.clone()).to_json());
            }
            let _ = tx.try_send(StreamMessage::connected(topic, job_id.as_deref()).to_json());

            inner.topics.entry(topic).or_default().insert(id, tx.clone());
            if let Some(job_id) = &job_id {
                inner.jobs.entry(job_id.clone()).or_default().insert(id, tx);
            }
            metrics::set_sse_subscribers(inner.subscriber_count());
        }
        drop(inner);

        tracing::debug!(topic = %topic, subscriber = id, job_id = ?job_id, "Stream subscriber added");
        Subscriber {
            id,
            topic,
            job_id,
            rx,
        }
    }

    /// Remove a mailbox. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriberId, job_id: Option<&str>) -> bool {
        let mut inner = self.lock();
        let mut removed = inner
            .topics
            .get_mut(&topic)
            .map(|m| m.remove(&id).is_some())
            .unwrap_or(false);
        if let Some(job_id) = job_id {
            if let Some(mailboxes) = inner.jobs.get_mut(job_id) {
                removed |= mailboxes.remove(&id).is_some();
                if mailboxes.is_empty() {
                    inner.jobs.remove(job_id);
                }
            }
        }
        metrics::set_sse_subscribers(inner.subscriber_count());
        removed
    }

    /// Deliver `message` to every mailbox on `topic` plus every mailbox
    /// watching `job_id`, each at most once. Returns the number delivered.
    pub fn publish(&self, topic: Topic, job_id: Option<&str>, message: &StreamMessage) -> usize {
        let value = match serde_json::to_value(message) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(topic = %topic, "Failed to encode stream message: {e}");
                return 0;
            }
        };
        let payload = value.to_string();

        let mut inner = self.lock();
        if inner.closed {
            return 0;
        }

        match job_id {
            Some(job_id) => inner.cache_job_state(topic, job_id, value),
            None => {
                inner
                    .last_state
                    .insert(topic, message.data.clone().unwrap_or(value));
                inner.cache_order.remove(&topic);
            }
        }

        let mut recipients: Vec<(SubscriberId, mpsc::Sender<String>)> = Vec::new();
        let mut seen = HashSet::new();
        let topic_boxes = inner.topics.get(&topic).into_iter().flatten();
        let job_boxes = job_id
            .and_then(|j| inner.jobs.get(j))
            .into_iter()
            .flatten();
        for (id, tx) in topic_boxes.chain(job_boxes) {
            if seen.insert(*id) {
                recipients.push((*id, tx.clone()));
            }
        }

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in recipients {
            match tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(topic = %topic, subscriber = id, "Evicting stream subscriber: {e}");
                    dead.push(id);
                }
            }
        }
        if !dead.is_empty() {
            inner.evict(&dead);
            metrics::record_sse_evictions(dead.len());
            metrics::set_sse_subscribers(inner.subscriber_count());
        }
        delivered
    }

    /// Drop cached state for a deleted job.
    pub fn forget_job(&self, job_id: &str) {
        let mut inner = self.lock();
        for cache in inner.last_state.values_mut() {
            if let Value::Object(map) = cache {
                map.remove(job_id);
            }
        }
        for order in inner.cache_order.values_mut() {
            order.retain(|id| id != job_id);
        }
    }

    pub fn stats(&self) -> HubStats {
        let inner = self.lock();
        HubStats {
            total_connections: inner.subscriber_count(),
            connections_by_type: Topic::ALL
                .iter()
                .map(|t| {
                    let count = inner.topics.get(t).map(|m| m.len()).unwrap_or(0);
                    (t.as_str().to_owned(), count)
                })
                .collect(),
            job_connections: inner
                .jobs
                .iter()
                .map(|(job, m)| (job.clone(), m.len()))
                .collect(),
            active_jobs: inner.jobs.len(),
        }
    }

    /// Send `server_shutdown` to everyone and release all mailboxes.
    ///
    /// Open streams deliver what is queued and then end.
    pub fn close(&self) {
        let payload = StreamMessage::server_shutdown().to_json();
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        let mut notified = HashSet::new();
        for (id, tx) in inner
            .topics
            .values()
            .flatten()
            .chain(inner.jobs.values().flatten())
        {
            if notified.insert(*id) {
                let _ = tx.try_send(payload.clone());
            }
        }
        inner.topics.clear();
        inner.jobs.clear();
        inner.closed = true;
        metrics::set_sse_subscribers(0);
        tracing::info!(subscribers = notified.len(), "Broadcast hub closed");
    }

    /// Subscribe and expose the mailbox as a stream of JSON payloads.
    ///
    /// Emits a heartbeat after each idle interval. Dropping the stream
    /// unsubscribes.
    pub fn stream(
        self: &Arc<Self>,
        topic: Topic,
        job_id: Option<String>,
    ) -> impl Stream<Item = String> + Send + 'static {
        let Subscriber { id, rx, .. } = self.subscribe(topic, job_id.clone());
        let guard = SubscriptionGuard {
            hub: Arc::clone(self),
            topic,
            id,
            job_id,
        };
        let heartbeat = self.heartbeat;

        async_stream::stream! {
            let _guard = guard;
            let mut rx = rx;
            loop {
                match tokio::time::timeout(heartbeat, rx.recv()).await {
                    Ok(Some(payload)) => yield payload,
                    Ok(None) => break,
                    Err(_) => yield StreamMessage::heartbeat().to_json(),
                }
            }
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

struct SubscriptionGuard {
    hub: Arc<BroadcastHub>,
    topic: Topic,
    id: SubscriberId,
    job_id: Option<String>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if self.hub.unsubscribe(self.topic, self.id, self.job_id.as_deref()) {
            tracing::debug!(topic = %self.topic, subscriber = self.id, "Stream subscriber disconnected");
        }
    }
}
