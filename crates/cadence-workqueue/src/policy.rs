//! Failure classification and the retry-versus-terminal decision.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::config::RetryConfig;
use crate::execution::ExecutionRecord;

/// How a failed execution should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// May succeed if run again.
    Transient,
    /// Will fail again; do not retry.
    Permanent,
}

/// Failure reported by a job body.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} failure: {message}")]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ExecutionFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

/// Hard ceiling on any computed backoff (30 days).
const BACKOFF_CEILING_SECS: u64 = 30 * 24 * 3600;

/// Outcome of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Re-submit, not before the given instant.
    Retry { not_before: DateTime<Utc> },
    /// Terminal `Failed`.
    Fail,
    /// Terminal `Abandoned`: attempts exhausted.
    Abandon,
}

/// Outcome of a lease that ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryDecision {
    Requeue,
    Abandon,
}

/// Retry policy: the only place that decides whether a failed execution runs
/// again.
#[derive(Debug, Clone)]
pub struct FailurePolicy {
    config: RetryConfig,
}

impl FailurePolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Decide what happens to `record` after `failure` at `now`.
    pub fn decide(
        &self,
        record: &ExecutionRecord,
        failure: &ExecutionFailure,
        now: DateTime<Utc>,
    ) -> Decision {
        match failure.kind {
            FailureKind::Permanent => Decision::Fail,
            FailureKind::Transient if record.attempt < self.max_attempts() => Decision::Retry {
                not_before: now + self.backoff(record.attempt),
            },
            FailureKind::Transient => Decision::Abandon,
        }
    }

    /// Decide what happens to an in-flight record whose lease expired.
    pub fn on_lease_expired(&self, record: &ExecutionRecord) -> ExpiryDecision {
        if record.attempt < self.max_attempts() {
            ExpiryDecision::Requeue
        } else {
            ExpiryDecision::Abandon
        }
    }

    /// Delay before the attempt following `attempt`: `base × 2^(attempt-1)`,
    /// capped at the configured maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let secs = self
            .config
            .backoff_base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.config.backoff_max_secs)
            .min(BACKOFF_CEILING_SECS);
        Duration::seconds(secs as i64)
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
