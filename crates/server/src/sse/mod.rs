// crates/server/src/sse/mod.rs
//! Server-sent event fan-out: topics, per-job subscriptions, heartbeats.

pub mod hub;
pub mod message;
pub mod system;

pub use hub::{BroadcastHub, HubStats, Subscriber, SubscriberId, HEARTBEAT_INTERVAL, MAILBOX_CAPACITY};
pub use message::{StreamMessage, Topic};
pub use system::spawn_system_publisher;
