//! Job definition persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::SchedulerResult;
use crate::job::{JobDefinition, Registration};

/// Job store trait for persistence.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a definition. An existing definition keeps its
    /// `created_at` and `last_enqueued_at`.
    async fn upsert(&self, job: &JobDefinition) -> SchedulerResult<Registration>;

    /// Remove a definition. Returns `false` if it did not exist.
    async fn remove(&self, id: &str) -> SchedulerResult<bool>;

    /// Load a definition by ID.
    async fn get(&self, id: &str) -> SchedulerResult<Option<JobDefinition>>;

    /// All definitions, ordered by ID.
    async fn list(&self) -> SchedulerResult<Vec<JobDefinition>>;

    /// Enabled definitions with `next_fire_at <= now`, earliest first.
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> SchedulerResult<Vec<JobDefinition>>;

    /// Move `next_fire_at` from `expected` to `next`, recording `now` as the
    /// dispatch time. Returns `false` if `next_fire_at` no longer equals
    /// `expected`.
    async fn advance(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        next: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<bool>;

    /// Pause or resume a definition, optionally resetting `next_fire_at`.
    /// Returns `false` if it does not exist.
    async fn set_enabled(
        &self,
        id: &str,
        enabled: bool,
        next_fire_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<bool>;
}

/// In-memory job store.
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, JobDefinition>>,
}

impl MemoryJobStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert(&self, job: &JobDefinition) -> SchedulerResult<Registration> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                let created_at = existing.created_at;
                let last_enqueued_at = existing.last_enqueued_at;
                *existing = job.clone();
                existing.created_at = created_at;
                existing.last_enqueued_at = last_enqueued_at;
                Ok(Registration::Updated)
            }
            None => {
                jobs.insert(job.id.clone(), job.clone());
                Ok(Registration::Created)
            }
        }
    }

    async fn remove(&self, id: &str) -> SchedulerResult<bool> {
        let mut jobs = self.jobs.write().await;
        Ok(jobs.remove(id).is_some())
    }

    async fn get(&self, id: &str) -> SchedulerResult<Option<JobDefinition>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(id).cloned())
    }

    async fn list(&self) -> SchedulerResult<Vec<JobDefinition>> {
        let jobs = self.jobs.read().await;
        let mut list: Vec<JobDefinition> = jobs.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> SchedulerResult<Vec<JobDefinition>> {
        let jobs = self.jobs.read().await;
        let mut due: Vec<JobDefinition> = jobs.values().filter(|j| j.is_due(now)).cloned().collect();
        due.sort_by(|a, b| (a.next_fire_at, &a.id).cmp(&(b.next_fire_at, &b.id)));
        due.truncate(limit);
        Ok(due)
    }

    async fn advance(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        next: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(id) else {
            return Ok(false);
        };
        if job.next_fire_at != expected {
            return Ok(false);
        }
        job.next_fire_at = next;
        job.last_enqueued_at = Some(now);
        job.updated_at = now;
        Ok(true)
    }

    async fn set_enabled(
        &self,
        id: &str,
        enabled: bool,
        next_fire_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(id) else {
            return Ok(false);
        };
        job.enabled = enabled;
        if let Some(next) = next_fire_at {
            job.next_fire_at = next;
        }
        job.updated_at = now;
        Ok(true)
    }
}


#[cfg(test)]
mod tests {
    use super::conformance;
    use super::*;

    #[tokio::test]
    async fn test_memory_upsert_creates_then_updates() {
        conformance::upsert_creates_then_updates(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn test_memory_remove_reports_existence() {
        conformance::remove_reports_existence(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn test_memory_due_is_ordered_and_bounded() {
        conformance::due_is_ordered_and_bounded(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn test_memory_advance_is_compare_and_swap() {
        conformance::advance_is_compare_and_swap(&MemoryJobStore::new()).await;
    }

    #[tokio::test]
    async fn test_memory_set_enabled_toggles() {
        conformance::set_enabled_toggles(&MemoryJobStore::new()).await;
    }
}
