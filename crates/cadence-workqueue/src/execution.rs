//! Execution records and leases.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Execution state.
///
/// `Pending → Leased → Running → {Succeeded | Failed | Abandoned}`, with
/// `Leased/Running → Pending` when a lease expires or a transient failure is
/// retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Waiting in its queue.
    Pending,
    /// Claimed by a worker, body not started yet.
    Leased,
    /// Body is executing.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Failed with a non-retryable fault.
    Failed,
    /// Gave up after exhausting attempts.
    Abandoned,
}

impl ExecutionState {
    /// All states, in lifecycle order.
    pub const ALL: [ExecutionState; 6] = [
        ExecutionState::Pending,
        ExecutionState::Leased,
        ExecutionState::Running,
        ExecutionState::Succeeded,
        ExecutionState::Failed,
        ExecutionState::Abandoned,
    ];

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Abandoned
        )
    }

    /// Whether a worker currently owns the record.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ExecutionState::Leased | ExecutionState::Running)
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Leased => "leased",
            ExecutionState::Running => "running",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
            ExecutionState::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExecutionState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| QueueError::Store(format!("unknown execution state: {s}")))
    }
}

/// One execution attempt chain of a job occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Generated execution ID.
    pub id: Uuid,
    /// Owning job definition ID.
    pub job_id: String,
    /// Queue the record is routed to.
    pub queue: String,
    /// Opaque handle resolved to a handler at execution time.
    pub payload_ref: String,
    /// Scheduled occurrence this execution belongs to.
    pub fire_time: DateTime<Utc>,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Current state.
    pub state: ExecutionState,
    /// Token of the current (or last) lease.
    pub lease_token: Option<Uuid>,
    /// Worker holding the current lease.
    pub lease_owner: Option<String>,
    /// Expiry of the current lease.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// When the record entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the record may be leased (retry backoff gate).
    pub available_at: DateTime<Utc>,
    /// When the body last started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the record reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Last error detail.
    pub last_error: Option<String>,
}

impl ExecutionRecord {
    /// Create a pending record for an occurrence of `job_id`.
    pub fn new(
        job_id: impl Into<String>,
        queue: impl Into<String>,
        payload_ref: impl Into<String>,
        fire_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job_id.into(),
            queue: queue.into(),
            payload_ref: payload_ref.into(),
            fire_time,
            attempt: 1,
            state: ExecutionState::Pending,
            lease_token: None,
            lease_owner: None,
            lease_expires_at: None,
            enqueued_at: now,
            available_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
            last_error: None,
        }
    }

    /// Whether the record may be leased at `now`.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.state == ExecutionState::Pending && self.available_at <= now
    }

    /// Whether the record is in flight with a lease that has run out.
    pub fn is_lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.is_in_flight() && self.lease_expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// The lease currently held on this record, if any.
    pub fn lease(&self) -> Option<Lease> {
        if !self.state.is_in_flight() {
            return None;
        }
        Some(Lease {
            execution_id: self.id,
            job_id: self.job_id.clone(),
            token: self.lease_token?,
            owner: self.lease_owner.clone().unwrap_or_default(),
            expires_at: self.lease_expires_at?,
            attempt: self.attempt,
        })
    }

    /// Verify that `token` still grants ownership at `now`.
    pub(crate) fn check_lease(&self, token: Uuid, now: DateTime<Utc>) -> Result<(), QueueError> {
        if self.lease_token != Some(token) || !self.state.is_in_flight() {
            return Err(QueueError::conflict(token, format!("record is {}", self.state)));
        }
        if self.is_lease_expired(now) {
            return Err(QueueError::conflict(token, "lease expired"));
        }
        Ok(())
    }
}

/// Time-bounded exclusive claim on an execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub execution_id: Uuid,
    pub job_id: String,
    pub token: Uuid,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
    pub attempt: u32,
}

/// A leased record handed to a worker.
#[derive(Debug, Clone)]
pub struct LeasedExecution {
    pub lease: Lease,
    pub record: ExecutionRecord,
}

/// Terminal outcome recorded by `complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    Failed(String),
    Abandoned(String),
}

impl Completion {
    /// Terminal state this completion produces.
    pub fn state(&self) -> ExecutionState {
        match self {
            Completion::Succeeded => ExecutionState::Succeeded,
            Completion::Failed(_) => ExecutionState::Failed,
            Completion::Abandoned(_) => ExecutionState::Abandoned,
        }
    }

    /// Error detail, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Completion::Succeeded => None,
            Completion::Failed(detail) | Completion::Abandoned(detail) => Some(detail),
        }
    }
}
