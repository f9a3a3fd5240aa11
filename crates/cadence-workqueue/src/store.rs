//! Execution record persistence.
//!
//! Every mutating operation is a single-record compare-and-swap: the guard
//! (expected state, lease token, expiry) is checked and the new state written
//! under one lock or one serialized database call.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::QueueError;
use crate::execution::{Completion, ExecutionRecord, ExecutionState};

/// Execution store trait for persistence.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a new record.
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), QueueError>;

    /// Load a record by ID.
    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>, QueueError>;

    /// Atomically lease the oldest available `Pending` record in `queue`
    /// whose job has no other record `Leased` or `Running`.
    async fn lease_next(
        &self,
        queue: &str,
        owner: &str,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Option<ExecutionRecord>, QueueError>;

    /// `Leased → Running`.
    async fn start(&self, token: Uuid, now: DateTime<Utc>) -> Result<ExecutionRecord, QueueError>;

    /// Push the lease expiry to `now + extension`.
    async fn renew(
        &self,
        token: Uuid,
        extension: Duration,
        now: DateTime<Utc>,
    ) -> Result<ExecutionRecord, QueueError>;

    /// Terminal transition.
    async fn finish(
        &self,
        token: Uuid,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<ExecutionRecord, QueueError>;

    /// Release the lease back to `Pending` with the attempt counter bumped,
    /// not leasable before `available_at`.
    async fn retry(
        &self,
        token: Uuid,
        error: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ExecutionRecord, QueueError>;

    /// In-flight records whose lease expired at or before `now`.
    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionRecord>, QueueError>;

    /// Return an expired lease to `Pending`, bumping the attempt counter.
    /// Returns `false` when the record no longer matches `token`.
    async fn reclaim(&self, id: Uuid, token: Uuid, now: DateTime<Utc>)
        -> Result<bool, QueueError>;

    /// Mark an expired lease `Abandoned`.
    /// Returns `false` when the record no longer matches `token`.
    async fn abandon(
        &self,
        id: Uuid,
        token: Uuid,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError>;

    /// All records of a job, oldest first.
    async fn list_for_job(&self, job_id: &str) -> Result<Vec<ExecutionRecord>, QueueError>;

    /// Number of records per state.
    async fn counts(&self) -> Result<HashMap<ExecutionState, usize>, QueueError>;

    /// Delete terminal records finished before `before`.
    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, QueueError>;
}

/// In-memory execution store.
pub struct MemoryExecutionStore {
    records: RwLock<HashMap<Uuid, ExecutionRecord>>,
}

impl MemoryExecutionStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn find_by_token(
    records: &mut HashMap<Uuid, ExecutionRecord>,
    token: Uuid,
) -> Result<&mut ExecutionRecord, QueueError> {
    records
        .values_mut()
        .find(|r| r.lease_token == Some(token) && r.state.is_in_flight())
        .ok_or_else(|| QueueError::conflict(token, "no in-flight record holds this lease"))
}

fn clear_lease(record: &mut ExecutionRecord) {
    record.lease_token = None;
    record.lease_owner = None;
    record.lease_expires_at = None;
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), QueueError> {
        let mut records = self.records.write().await;
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>, QueueError> {
        let records = self.records.read().await;
        Ok(records.get(&id).cloned())
    }

    async fn lease_next(
        &self,
        queue: &str,
        owner: &str,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Option<ExecutionRecord>, QueueError> {
        let mut records = self.records.write().await;

        let busy: HashSet<String> = records
            .values()
            .filter(|r| r.state.is_in_flight())
            .map(|r| r.job_id.clone())
            .collect();

        let candidate = records
            .values()
            .filter(|r| r.queue == queue && r.is_available(now) && !busy.contains(&r.job_id))
            .min_by_key(|r| (r.available_at, r.enqueued_at, r.id))
            .map(|r| r.id);

        let Some(id) = candidate else {
            return Ok(None);
        };
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };

        record.state = ExecutionState::Leased;
        record.lease_token = Some(Uuid::new_v4());
        record.lease_owner = Some(owner.to_string());
        record.lease_expires_at = Some(now + duration);
        record.updated_at = now;
        Ok(Some(record.clone()))
    }

    async fn start(&self, token: Uuid, now: DateTime<Utc>) -> Result<ExecutionRecord, QueueError> {
        let mut records = self.records.write().await;
        let record = find_by_token(&mut records, token)?;
        record.check_lease(token, now)?;
        if record.state != ExecutionState::Leased {
            return Err(QueueError::conflict(token, format!("record is {}", record.state)));
        }
        record.state = ExecutionState::Running;
        record.started_at = Some(now);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn renew(
        &self,
        token: Uuid,
        extension: Duration,
        now: DateTime<Utc>,
    ) -> Result<ExecutionRecord, QueueError> {
        let mut records = self.records.write().await;
        let record = find_by_token(&mut records, token)?;
        record.check_lease(token, now)?;
        record.lease_expires_at = Some(now + extension);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn finish(
        &self,
        token: Uuid,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<ExecutionRecord, QueueError> {
        let mut records = self.records.write().await;
        let record = find_by_token(&mut records, token)?;
        record.check_lease(token, now)?;
        record.state = completion.state();
        record.last_error = completion.detail().map(str::to_string);
        record.lease_expires_at = None;
        record.finished_at = Some(now);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn retry(
        &self,
        token: Uuid,
        error: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ExecutionRecord, QueueError> {
        let mut records = self.records.write().await;
        let record = find_by_token(&mut records, token)?;
        record.check_lease(token, now)?;
        record.state = ExecutionState::Pending;
        record.attempt += 1;
        record.available_at = available_at;
        record.last_error = Some(error.to_string());
        record.updated_at = now;
        clear_lease(record);
        Ok(record.clone())
    }

    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionRecord>, QueueError> {
        let records = self.records.read().await;
        let mut expired: Vec<ExecutionRecord> = records
            .values()
            .filter(|r| r.is_lease_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.lease_expires_at);
        Ok(expired)
    }

    async fn reclaim(
        &self,
        id: Uuid,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.lease_token != Some(token) || !record.is_lease_expired(now) {
            return Ok(false);
        }
        record.state = ExecutionState::Pending;
        record.attempt += 1;
        record.available_at = now;
        record.last_error = Some("lease expired".to_string());
        record.updated_at = now;
        clear_lease(record);
        Ok(true)
    }

    async fn abandon(
        &self,
        id: Uuid,
        token: Uuid,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if record.lease_token != Some(token) || !record.is_lease_expired(now) {
            return Ok(false);
        }
        record.state = ExecutionState::Abandoned;
        record.last_error = Some(detail.to_string());
        record.lease_expires_at = None;
        record.finished_at = Some(now);
        record.updated_at = now;
        Ok(true)
    }

    async fn list_for_job(&self, job_id: &str) -> Result<Vec<ExecutionRecord>, QueueError> {
        let records = self.records.read().await;
        let mut list: Vec<ExecutionRecord> = records
            .values()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        list.sort_by_key(|r| (r.enqueued_at, r.id));
        Ok(list)
    }

    async fn counts(&self) -> Result<HashMap<ExecutionState, usize>, QueueError> {
        let records = self.records.read().await;
        let mut counts = HashMap::new();
        for record in records.values() {
            *counts.entry(record.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut records = self.records.write().await;
        let len = records.len();
        records.retain(|_, r| {
            !(r.state.is_terminal() && r.finished_at.is_some_and(|finished| finished < before))
        });
        Ok(len - records.len())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
