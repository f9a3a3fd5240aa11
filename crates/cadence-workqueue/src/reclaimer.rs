//! Background maintenance: expired lease recovery and history pruning.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::policy::{ExpiryDecision, FailurePolicy};
use crate::queue::WorkQueue;

/// Result of one reclaim sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimReport {
    pub requeued: usize,
    pub abandoned: usize,
}

impl ReclaimReport {
    pub fn is_empty(&self) -> bool {
        self.requeued == 0 && self.abandoned == 0
    }
}

/// Returns executions whose worker vanished to the queue, or abandons them
/// once their attempts are used up.
pub struct LeaseReclaimer {
    queue: Arc<WorkQueue>,
    policy: Arc<FailurePolicy>,
    config: QueueConfig,
}

impl LeaseReclaimer {
    pub fn new(queue: Arc<WorkQueue>, policy: Arc<FailurePolicy>, config: QueueConfig) -> Self {
        Self {
            queue,
            policy,
            config,
        }
    }

    /// Handle every lease that has expired by now. Each transition is
    /// conditional on the observed lease token, so concurrent sweeps never
    /// count the same timeout twice.
    pub async fn sweep(&self) -> Result<ReclaimReport, QueueError> {
        let mut report = ReclaimReport::default();

        for record in self.queue.expired_leases().await? {
            match self.policy.on_lease_expired(&record) {
                ExpiryDecision::Requeue => {
                    if self.queue.reclaim(&record).await? {
                        warn!(
                            execution_id = %record.id,
                            job_id = %record.job_id,
                            owner = record.lease_owner.as_deref().unwrap_or(""),
                            attempt = record.attempt,
                            "Lease expired, execution re-queued"
                        );
                        report.requeued += 1;
                    }
                }
                ExpiryDecision::Abandon => {
                    let detail = format!(
                        "lease expired on final attempt {} of {}",
                        record.attempt,
                        self.policy.max_attempts()
                    );
                    if self.queue.abandon(&record, &detail).await? {
                        warn!(
                            execution_id = %record.id,
                            job_id = %record.job_id,
                            attempt = record.attempt,
                            "Lease expired, execution abandoned"
                        );
                        report.abandoned += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Delete terminal records past the retention window.
    pub async fn prune(&self) -> Result<usize, QueueError> {
        let purged = self
            .queue
            .purge_history(self.config.history_retention())
            .await?;
        if purged > 0 {
            info!("Pruned {} finished executions", purged);
        }
        Ok(purged)
    }

    /// Run sweeps and prunes on their intervals until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut sweep = tokio::time::interval(self.config.reclaim_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut prune = tokio::time::interval(self.config.prune_interval());
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Lease reclaimer started (sweep every {:?}, prune every {:?})",
            self.config.reclaim_interval(),
            self.config.prune_interval()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sweep.tick() => {
                    match self.sweep().await {
                        Ok(report) if !report.is_empty() => debug!(?report, "Reclaim sweep finished"),
                        Ok(_) => {}
                        Err(e) => error!("Reclaim sweep failed: {}", e),
                    }
                }
                _ = prune.tick() => {
                    if let Err(e) = self.prune().await {
                        error!("History prune failed: {}", e);
                    }
                }
            }
        }

        info!("Lease reclaimer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::RetryConfig;
    use crate::events::TracingEventSink;
    use crate::execution::{Completion, ExecutionRecord, ExecutionState};
    use crate::store::MemoryExecutionStore;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    const LEASE: Duration = Duration::from_secs(60);

    fn setup(max_attempts: u32) -> (Arc<ManualClock>, Arc<WorkQueue>, LeaseReclaimer) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 15, 2, 0, 0).unwrap(),
        ));
        let queue = Arc::new(WorkQueue::new(
            Arc::new(MemoryExecutionStore::new()),
            clock.clone(),
            Arc::new(TracingEventSink),
        ));
        let policy = Arc::new(FailurePolicy::new(RetryConfig {
            max_attempts,
            ..Default::default()
        }));
        let reclaimer = LeaseReclaimer::new(
            queue.clone(),
            policy,
            QueueConfig {
                history_retention_hours: 1,
                ..Default::default()
            },
        );
        (clock, queue, reclaimer)
    }

    async fn enqueue(clock: &ManualClock, queue: &WorkQueue, job_id: &str) -> uuid::Uuid {
        let now = clock.now();
        queue
            .enqueue("q", ExecutionRecord::new(job_id, "q", "p", now, now))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_requeues_once_per_timeout() {
        let (clock, queue, reclaimer) = setup(3);
        let id = enqueue(&clock, &queue, "job").await;
        queue.lease("q", "crashed", LEASE).await.unwrap().unwrap();

        assert!(reclaimer.sweep().await.unwrap().is_empty());

        clock.advance(chrono::Duration::seconds(61));
        let report = reclaimer.sweep().await.unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(report.abandoned, 0);
        // Second sweep in the same cycle finds nothing.
        assert!(reclaimer.sweep().await.unwrap().is_empty());

        let record = queue.get(id).await.unwrap();
        assert_eq!(record.state, ExecutionState::Pending);
        assert_eq!(record.attempt, 2);
    }

    #[tokio::test]
    async fn test_sweep_abandons_after_max_attempts() {
        let (clock, queue, reclaimer) = setup(2);
        let id = enqueue(&clock, &queue, "job").await;

        for _ in 0..2 {
            queue.lease("q", "crashed", LEASE).await.unwrap().unwrap();
            clock.advance(chrono::Duration::seconds(61));
            reclaimer.sweep().await.unwrap();
        }

        let record = queue.get(id).await.unwrap();
        assert_eq!(record.state, ExecutionState::Abandoned);
        assert_eq!(record.attempt, 2);

        // Never leased again.
        assert!(queue.lease("q", "w", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_respects_retention() {
        let (clock, queue, reclaimer) = setup(3);
        enqueue(&clock, &queue, "job").await;
        let leased = queue.lease("q", "w", LEASE).await.unwrap().unwrap();
        queue
            .complete(leased.lease.token, Completion::Succeeded)
            .await
            .unwrap();

        clock.advance(chrono::Duration::minutes(30));
        assert_eq!(reclaimer.prune().await.unwrap(), 0);
        clock.advance(chrono::Duration::minutes(31));
        assert_eq!(reclaimer.prune().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let (_clock, _queue, reclaimer) = setup(3);
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(120)).await;
            stopper.cancel();
        });
        reclaimer.run(cancel).await;
    }
}
