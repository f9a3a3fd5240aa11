//! Queue errors.

use thiserror::Error;
use uuid::Uuid;

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Execution record not found.
    #[error("Execution not found: {0}")]
    NotFound(String),

    /// The lease token is stale, expired, or belongs to a record that has
    /// already moved on. The holder must stop working on the execution.
    #[error("Lease conflict for token {token}: {reason}")]
    LeaseConflict { token: Uuid, reason: String },

    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Worker error.
    #[error("Worker error: {0}")]
    WorkerError(String),
}

impl QueueError {
    pub(crate) fn conflict(token: Uuid, reason: impl Into<String>) -> Self {
        QueueError::LeaseConflict {
            token,
            reason: reason.into(),
        }
    }
}

impl From<tokio_rusqlite::Error> for QueueError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        QueueError::Store(e.to_string())
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Store(e.to_string())
    }
}
