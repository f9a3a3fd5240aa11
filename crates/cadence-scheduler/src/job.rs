//! Recurring job definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};

/// A named recurring job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Caller-chosen unique ID.
    pub id: String,
    /// Cron expression (UTC).
    pub schedule: String,
    /// Queue executions are routed to.
    pub queue: String,
    /// Handle resolved to a handler when an execution runs.
    pub payload_ref: String,
    /// Paused jobs are never due.
    pub enabled: bool,
    /// Next occurrence to dispatch.
    pub next_fire_at: DateTime<Utc>,
    /// When an occurrence was last dispatched.
    pub last_enqueued_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobDefinition {
    /// Whether the job should be dispatched at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_fire_at <= now
    }

    pub(crate) fn validate_identity(id: &str, queue: &str, payload_ref: &str) -> SchedulerResult<()> {
        if id.trim().is_empty() {
            return Err(SchedulerError::InvalidDefinition(
                "job id must not be empty".to_string(),
            ));
        }
        if queue.trim().is_empty() {
            return Err(SchedulerError::InvalidDefinition(format!(
                "job '{id}' has an empty queue name"
            )));
        }
        if payload_ref.trim().is_empty() {
            return Err(SchedulerError::InvalidDefinition(format!(
                "job '{id}' has an empty payload reference"
            )));
        }
        Ok(())
    }
}

/// Outcome of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Registration {
    Created,
    Updated,
}
