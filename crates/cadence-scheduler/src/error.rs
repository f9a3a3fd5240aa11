//! Error types for the scheduler.

use thiserror::Error;

use cadence_workqueue::QueueError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The schedule expression cannot be evaluated.
    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    /// The job definition is malformed.
    #[error("Invalid job definition: {0}")]
    InvalidDefinition(String),

    /// No job with the given ID.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(String),

    /// The scheduler was shut down and cannot be started again.
    #[error("Scheduler has been shut down")]
    ShutDown,

    /// Work queue failure.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl SchedulerError {
    pub(crate) fn invalid_schedule(expression: &str, reason: impl Into<String>) -> Self {
        SchedulerError::InvalidSchedule {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<tokio_rusqlite::Error> for SchedulerError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        SchedulerError::Store(e.to_string())
    }
}

impl From<rusqlite::Error> for SchedulerError {
    fn from(e: rusqlite::Error) -> Self {
        SchedulerError::Store(e.to_string())
    }
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;
