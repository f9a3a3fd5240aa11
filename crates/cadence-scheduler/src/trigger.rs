//! Trigger loop: turns due job definitions into pending executions.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cadence_workqueue::{ExecutionRecord, WorkQueue};

use crate::config::TriggerConfig;
use crate::error::SchedulerResult;
use crate::registry::JobRegistry;

/// Result of one poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    /// Occurrences dispatched to the work queue.
    pub enqueued: usize,
    /// Due jobs another poller advanced first.
    pub skipped: usize,
    /// Due jobs that could not be advanced or dispatched.
    pub failed: usize,
}

/// Cooperative poller dispatching due jobs.
pub struct TriggerLoop {
    registry: Arc<JobRegistry>,
    queue: Arc<WorkQueue>,
    config: TriggerConfig,
}

impl TriggerLoop {
    pub fn new(registry: Arc<JobRegistry>, queue: Arc<WorkQueue>, config: TriggerConfig) -> Self {
        Self {
            registry,
            queue,
            config,
        }
    }

    /// Dispatch every job due now, earliest first.
    ///
    /// The next fire time is persisted before the execution is enqueued, so
    /// a crash in between loses the occurrence rather than duplicating it.
    pub async fn poll_once(&self) -> SchedulerResult<PollReport> {
        let now = self.registry.clock().now();
        let mut report = PollReport::default();

        for job in self.registry.due_jobs_limited(now, self.config.batch_size()).await? {
            match self.registry.mark_enqueued(&job, now).await {
                Ok(true) => {}
                Ok(false) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!(job_id = %job.id, "Failed to advance job schedule: {}", e);
                    report.failed += 1;
                    continue;
                }
            }

            let record =
                ExecutionRecord::new(&job.id, &job.queue, &job.payload_ref, job.next_fire_at, now);
            match self.queue.enqueue(&job.queue, record).await {
                Ok(execution_id) => {
                    info!(
                        job_id = %job.id,
                        execution_id = %execution_id,
                        queue = %job.queue,
                        fire_time = %job.next_fire_at,
                        "Job triggered"
                    );
                    report.enqueued += 1;
                }
                Err(e) => {
                    error!(
                        job_id = %job.id,
                        fire_time = %job.next_fire_at,
                        "Failed to enqueue occurrence, it will not run: {}",
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Enqueue an immediate execution of `id` without touching its schedule.
    pub async fn trigger_now(&self, id: &str) -> SchedulerResult<Uuid> {
        let job = self.registry.get(id).await?;
        let now = self.queue.now();
        let record = ExecutionRecord::new(&job.id, &job.queue, &job.payload_ref, now, now);
        let execution_id = self.queue.enqueue(&job.queue, record).await?;
        info!(job_id = %id, execution_id = %execution_id, "Job triggered manually");
        Ok(execution_id)
    }

    /// Poll until `cancel` fires. Polls back to back while work keeps being
    /// found, otherwise waits `poll_interval` between polls.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Trigger loop started (interval={}ms, batch={})",
            self.config.poll_interval().as_millis(),
            self.config.batch_size()
        );

        while !cancel.is_cancelled() {
            let busy = match self.poll_once().await {
                Ok(report) => {
                    if report.skipped > 0 || report.failed > 0 {
                        warn!(?report, "Trigger poll finished with skipped or failed jobs");
                    } else if report.enqueued > 0 {
                        debug!(?report, "Trigger poll finished");
                    }
                    report.enqueued > 0
                }
                Err(e) => {
                    error!("Trigger poll failed: {}", e);
                    false
                }
            };

            if busy {
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        info!("Trigger loop stopped");
    }
}

#[cfg(test)]
#[path = "trigger_tests.rs"]
mod tests;
