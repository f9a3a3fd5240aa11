//! # Cadence Scheduler
//!
//! Cron-driven recurring jobs on top of the Cadence work queue.
//!
//! ## Features
//!
//! - Five-field cron schedules evaluated in UTC
//! - Job registry with idempotent registration, pause and resume
//! - Job definition persistence (memory or SQLite)
//! - Trigger loop with compare-and-swap schedule advancement
//! - A [`Scheduler`] service wiring the trigger loop, worker pool and lease
//!   reclaimer together

pub mod config;
pub mod error;
pub mod job;
pub mod registry;
pub mod schedule;
pub mod service;
pub mod sqlite;
pub mod store;
pub mod trigger;

pub use config::TriggerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use job::{JobDefinition, Registration};
pub use registry::{DueJobs, JobRegistry};
pub use schedule::{next_fire_time, CronSchedule};
pub use service::{Scheduler, SchedulerBuilder};
pub use sqlite::SqliteJobStore;
pub use store::{JobStore, MemoryJobStore};
pub use trigger::{PollReport, TriggerLoop};

pub use cadence_workqueue::{Clock, ManualClock, SystemClock};
