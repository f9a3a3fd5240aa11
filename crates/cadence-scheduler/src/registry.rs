//! Job registry: registration and due-time bookkeeping over a [`JobStore`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use cadence_workqueue::Clock;

use crate::error::{SchedulerError, SchedulerResult};
use crate::job::{JobDefinition, Registration};
use crate::schedule::CronSchedule;
use crate::store::JobStore;

/// Finite snapshot of the definitions due at one instant, earliest first.
#[derive(Debug)]
pub struct DueJobs {
    jobs: std::vec::IntoIter<JobDefinition>,
}

impl Iterator for DueJobs {
    type Item = JobDefinition;

    fn next(&mut self) -> Option<Self::Item> {
        self.jobs.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.jobs.size_hint()
    }
}

impl ExactSizeIterator for DueJobs {}

/// Registry of recurring jobs.
pub struct JobRegistry {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Register a job, or update the job already registered under `id`.
    ///
    /// Re-registering with an unchanged schedule keeps the pending
    /// occurrence; a changed schedule is re-evaluated from now. The enabled
    /// flag, `created_at` and `last_enqueued_at` survive re-registration.
    pub async fn register(
        &self,
        id: &str,
        schedule: &str,
        queue: &str,
        payload_ref: &str,
    ) -> SchedulerResult<Registration> {
        JobDefinition::validate_identity(id, queue, payload_ref)?;
        let cron = CronSchedule::parse(schedule)?;
        let now = self.clock.now();
        let existing = self.store.get(id).await?;

        let next_fire_at = match &existing {
            Some(job) if job.schedule == cron.expression() => job.next_fire_at,
            _ => cron.next_after(now)?,
        };

        let job = JobDefinition {
            id: id.to_string(),
            schedule: cron.expression().to_string(),
            queue: queue.to_string(),
            payload_ref: payload_ref.to_string(),
            enabled: existing.as_ref().map(|j| j.enabled).unwrap_or(true),
            next_fire_at,
            last_enqueued_at: existing.as_ref().and_then(|j| j.last_enqueued_at),
            created_at: existing.as_ref().map(|j| j.created_at).unwrap_or(now),
            updated_at: now,
        };

        let registration = self.store.upsert(&job).await?;
        info!(
            job_id = %id,
            schedule = %job.schedule,
            queue = %queue,
            next_fire_at = %next_fire_at,
            "Job {}",
            match registration {
                Registration::Created => "registered",
                Registration::Updated => "updated",
            }
        );
        Ok(registration)
    }

    /// Remove a job. Executions already enqueued are left to run.
    pub async fn deregister(&self, id: &str) -> SchedulerResult<()> {
        if !self.store.remove(id).await? {
            return Err(SchedulerError::NotFound(id.to_string()));
        }
        info!(job_id = %id, "Job deregistered");
        Ok(())
    }

    /// Definitions due at `now`. Each call re-reads the store.
    pub async fn due_jobs(&self, now: DateTime<Utc>) -> SchedulerResult<DueJobs> {
        self.due_jobs_limited(now, usize::MAX).await
    }

    /// At most `limit` definitions due at `now`.
    pub async fn due_jobs_limited(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<DueJobs> {
        let jobs = self.store.due(now, limit).await?;
        Ok(DueJobs {
            jobs: jobs.into_iter(),
        })
    }

    /// Advance `job` past `now` before its occurrence is dispatched.
    ///
    /// Returns `false` if another poller already advanced it from the
    /// `next_fire_at` observed in `job`. Occurrences missed while the
    /// scheduler was down are skipped.
    pub async fn mark_enqueued(&self, job: &JobDefinition, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let cron = CronSchedule::parse(&job.schedule)?;
        let next = cron.next_after(now.max(job.next_fire_at))?;
        let advanced = self.store.advance(&job.id, job.next_fire_at, next, now).await?;
        if advanced {
            debug!(job_id = %job.id, next_fire_at = %next, "Advanced job schedule");
        } else {
            debug!(job_id = %job.id, "Job already advanced by another poll");
        }
        Ok(advanced)
    }

    /// Pause or resume a job. Resuming a paused job schedules its next
    /// occurrence from now.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> SchedulerResult<()> {
        let job = self.get(id).await?;
        let now = self.clock.now();
        let next_fire_at = if enabled && !job.enabled {
            Some(CronSchedule::parse(&job.schedule)?.next_after(now)?)
        } else {
            None
        };
        if !self.store.set_enabled(id, enabled, next_fire_at, now).await? {
            return Err(SchedulerError::NotFound(id.to_string()));
        }
        info!(job_id = %id, enabled, "Job {}", if enabled { "resumed" } else { "paused" });
        Ok(())
    }

    pub async fn get(&self, id: &str) -> SchedulerResult<JobDefinition> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    /// All jobs, ordered by ID.
    pub async fn list(&self) -> SchedulerResult<Vec<JobDefinition>> {
        self.store.list().await
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
