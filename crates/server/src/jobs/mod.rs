// crates/server/src/jobs/mod.rs
//! Training job orchestration.
//!
//! - `JobManager` - lifecycle, admission control, progress recording
//! - `JobStore` - durable job table
//! - `EventLog` - bounded per-job progress history
//! - `JobHandle` - cancellation handle for an execution unit

pub mod error;
pub mod events;
pub mod manager;
mod runner;
pub mod store;
pub mod types;

pub use error::{JobError, StoreError};
pub use events::{EventLog, MAX_EVENTS_PER_JOB};
pub use manager::{JobManager, DEFAULT_LIST_LIMIT, RESTART_ERROR};
pub use store::JobStore;
pub use types::{ExecutionOutcome, JobHandle};
