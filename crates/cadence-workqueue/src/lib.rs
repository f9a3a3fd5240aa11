//! # Cadence Work Queue
//!
//! Leased execution queue for the Cadence scheduler.
//!
//! ## Features
//!
//! - Named queues with FIFO leasing and per-job single-flight
//! - Visibility timeout with lease renewal and background reclaim
//! - Bounded worker pool with graceful shutdown
//! - Retry policy with exponential backoff and attempt limits
//! - Execution record persistence (memory or SQLite)
//! - Execution lifecycle events

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod policy;
pub mod queue;
pub mod reclaimer;
pub mod runner;
pub mod sqlite;
pub mod store;
pub mod worker;

#[cfg(test)]
pub(crate) mod conformance;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{QueueConfig, RetryConfig, WorkerConfig};
pub use error::QueueError;
pub use events::{
    BroadcastEventSink, EventSink, ExecutionEvent, FanoutEventSink, TracingEventSink,
};
pub use execution::{Completion, ExecutionRecord, ExecutionState, Lease, LeasedExecution};
pub use policy::{Decision, ExecutionFailure, ExpiryDecision, FailureKind, FailurePolicy};
pub use queue::WorkQueue;
pub use reclaimer::{LeaseReclaimer, ReclaimReport};
pub use runner::{ExecutionRunner, HandlerRegistry, JobContext, JobHandler, RunOutcome};
pub use sqlite::SqliteExecutionStore;
pub use store::{ExecutionStore, MemoryExecutionStore};
pub use worker::{Worker, WorkerPool};
