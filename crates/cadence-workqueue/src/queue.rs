//! Work queue and lease manager.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::QueueError;
use crate::events::{EventSink, ExecutionEvent, TracingEventSink};
use crate::execution::{
    Completion, ExecutionRecord, ExecutionState, Lease, LeasedExecution,
};
use crate::store::{ExecutionStore, MemoryExecutionStore};

pub(crate) fn to_chrono(duration: Duration) -> Result<chrono::Duration, QueueError> {
    chrono::Duration::from_std(duration)
        .map_err(|e| QueueError::WorkerError(format!("invalid duration {duration:?}: {e}")))
}

/// Named queues of execution records with lease-based ownership.
///
/// All state lives in the [`ExecutionStore`]; this type adds the clock,
/// event emission and idle-worker wake-ups on top of it.
pub struct WorkQueue {
    store: Arc<dyn ExecutionStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    notify: Notify,
}

impl WorkQueue {
    /// Create a queue over `store`.
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            notify: Notify::new(),
        }
    }

    /// In-memory queue on the wall clock, logging events.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryExecutionStore::new()),
            Arc::new(SystemClock),
            Arc::new(TracingEventSink),
        )
    }

    /// Current time according to the queue's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn emit(&self, record: &ExecutionRecord) {
        self.events.emit(&ExecutionEvent::from_record(record, self.clock.now()));
    }

    /// Store `record` as `Pending` in `queue` and wake idle workers.
    pub async fn enqueue(&self, queue: &str, mut record: ExecutionRecord) -> Result<Uuid, QueueError> {
        record.queue = queue.to_string();
        record.state = ExecutionState::Pending;
        self.store.insert(&record).await?;
        debug!(
            execution_id = %record.id,
            job_id = %record.job_id,
            queue = %queue,
            "Enqueued execution"
        );
        self.emit(&record);
        self.notify.notify_waiters();
        Ok(record.id)
    }

    /// Lease the oldest available record of `queue` for `duration`.
    pub async fn lease(
        &self,
        queue: &str,
        owner: &str,
        duration: Duration,
    ) -> Result<Option<LeasedExecution>, QueueError> {
        let now = self.clock.now();
        let Some(record) = self
            .store
            .lease_next(queue, owner, now, to_chrono(duration)?)
            .await?
        else {
            return Ok(None);
        };
        let lease = record.lease().ok_or_else(|| {
            QueueError::Store(format!("leased record {} carries no lease", record.id))
        })?;
        debug!(
            execution_id = %record.id,
            job_id = %record.job_id,
            owner = %owner,
            attempt = record.attempt,
            "Leased execution"
        );
        self.emit(&record);
        Ok(Some(LeasedExecution { lease, record }))
    }

    /// Lease from the first queue in `queues` that has available work.
    pub async fn lease_any(
        &self,
        queues: &[String],
        owner: &str,
        duration: Duration,
    ) -> Result<Option<LeasedExecution>, QueueError> {
        for queue in queues {
            if let Some(leased) = self.lease(queue, owner, duration).await? {
                return Ok(Some(leased));
            }
        }
        Ok(None)
    }

    /// Mark the leased record `Running`.
    pub async fn start(&self, token: Uuid) -> Result<ExecutionRecord, QueueError> {
        let record = self.store.start(token, self.clock.now()).await?;
        self.emit(&record);
        Ok(record)
    }

    /// Extend the lease to `now + extension`.
    pub async fn renew(&self, token: Uuid, extension: Duration) -> Result<Lease, QueueError> {
        let record = self
            .store
            .renew(token, to_chrono(extension)?, self.clock.now())
            .await?;
        record
            .lease()
            .ok_or_else(|| QueueError::conflict(token, "lease vanished on renewal"))
    }

    /// Record the terminal outcome of the leased execution.
    pub async fn complete(
        &self,
        token: Uuid,
        completion: Completion,
    ) -> Result<ExecutionRecord, QueueError> {
        let record = self
            .store
            .finish(token, &completion, self.clock.now())
            .await?;
        self.emit(&record);
        Ok(record)
    }

    /// Give the leased execution back as a new attempt, leasable from
    /// `not_before`.
    pub async fn retry(
        &self,
        token: Uuid,
        error: &str,
        not_before: DateTime<Utc>,
    ) -> Result<ExecutionRecord, QueueError> {
        let record = self
            .store
            .retry(token, error, not_before, self.clock.now())
            .await?;
        self.emit(&record);
        self.notify.notify_waiters();
        Ok(record)
    }

    /// In-flight records whose lease has run out.
    pub async fn expired_leases(&self) -> Result<Vec<ExecutionRecord>, QueueError> {
        self.store.expired(self.clock.now()).await
    }

    /// Return an expired record to `Pending`. `false` when another party got
    /// there first.
    pub async fn reclaim(&self, record: &ExecutionRecord) -> Result<bool, QueueError> {
        let Some(token) = record.lease_token else {
            return Ok(false);
        };
        if !self.store.reclaim(record.id, token, self.clock.now()).await? {
            return Ok(false);
        }
        if let Some(updated) = self.store.get(record.id).await? {
            self.emit(&updated);
        }
        self.notify.notify_waiters();
        Ok(true)
    }

    /// Mark an expired record `Abandoned`.
    pub async fn abandon(&self, record: &ExecutionRecord, detail: &str) -> Result<bool, QueueError> {
        let Some(token) = record.lease_token else {
            return Ok(false);
        };
        if !self
            .store
            .abandon(record.id, token, detail, self.clock.now())
            .await?
        {
            return Ok(false);
        }
        if let Some(updated) = self.store.get(record.id).await? {
            self.emit(&updated);
        }
        Ok(true)
    }

    /// Delete terminal records older than `retention`.
    pub async fn purge_history(&self, retention: Duration) -> Result<usize, QueueError> {
        let cutoff = self.clock.now() - to_chrono(retention)?;
        self.store.purge_finished(cutoff).await
    }

    pub async fn get(&self, id: Uuid) -> Result<ExecutionRecord, QueueError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    pub async fn records_for_job(&self, job_id: &str) -> Result<Vec<ExecutionRecord>, QueueError> {
        self.store.list_for_job(job_id).await
    }

    pub async fn counts(&self) -> Result<HashMap<ExecutionState, usize>, QueueError> {
        self.store.counts().await
    }

    /// Register for the next new-work notification. The returned future
    /// resolves on any enqueue or requeue made after this call, even one
    /// that happens before it is first polled.
    pub fn work_signal(&self) -> Pin<Box<Notified<'_>>> {
        let mut notified = Box::pin(self.notify.notified());
        notified.as_mut().enable();
        notified
    }

    /// Wait until new work is enqueued or `timeout` elapses. Returns `true`
    /// when woken by new work.
    pub async fn wait_for_work(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.work_signal())
            .await
            .is_ok()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
