use super::*;
use crate::error::SchedulerError;
use async_trait::async_trait;
use cadence_workqueue::{
    BroadcastEventSink, ExecutionFailure, JobContext, JobHandler, ManualClock,
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::AtomicUsize;

fn at(h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, h, mi, 0).unwrap()
}

#[derive(Default)]
struct Counter {
    runs: AtomicUsize,
}

#[async_trait]
impl JobHandler for Counter {
    async fn run(&self, _ctx: JobContext) -> Result<(), ExecutionFailure> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn scheduler(clock: Arc<ManualClock>, counter: Arc<Counter>) -> Scheduler {
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register("count", counter);
    Scheduler::builder()
        .name("test")
        .clock(clock)
        .handlers(handlers)
        .events(Arc::new(BroadcastEventSink::new(64)))
        .trigger_config(TriggerConfig {
            poll_interval_ms: 10,
            ..Default::default()
        })
        .worker_config(WorkerConfig {
            max_workers: Some(2),
            queues: vec!["reports".to_string()],
            idle_poll_ms: 10,
            ..Default::default()
        })
        .build()
}

async fn wait_for_state(scheduler: &Scheduler, job_id: &str, state: ExecutionState) -> bool {
    for _ in 0..300 {
        let records = scheduler.executions(job_id).await.unwrap();
        if records.iter().any(|r| r.state == state) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_due_job_runs_to_success() {
    let clock = Arc::new(ManualClock::new(at(1, 59)));
    let counter = Arc::new(Counter::default());
    let scheduler = scheduler(clock.clone(), counter.clone());

    scheduler
        .register("daily-report", "0 2 * * *", "reports", "count")
        .await
        .unwrap();
    scheduler.start().unwrap();
    assert!(scheduler.is_running());

    clock.set(at(2, 0));
    assert!(wait_for_state(&scheduler, "daily-report", ExecutionState::Succeeded).await);
    assert_eq!(counter.runs.load(Ordering::SeqCst), 1);

    let counts = scheduler.counts().await.unwrap();
    assert_eq!(counts.get(&ExecutionState::Succeeded), Some(&1));

    assert!(scheduler.shutdown_with_grace(Duration::from_secs(5)).await);
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn test_trigger_now_and_management() {
    let clock = Arc::new(ManualClock::new(at(1, 0)));
    let counter = Arc::new(Counter::default());
    let scheduler = scheduler(clock, counter.clone());

    scheduler
        .register("daily-report", "0 2 * * *", "reports", "count")
        .await
        .unwrap();
    scheduler.set_enabled("daily-report", false).await.unwrap();
    assert!(!scheduler.job("daily-report").await.unwrap().enabled);

    scheduler.start().unwrap();
    scheduler.trigger_now("daily-report").await.unwrap();
    assert!(wait_for_state(&scheduler, "daily-report", ExecutionState::Succeeded).await);
    assert_eq!(counter.runs.load(Ordering::SeqCst), 1);

    scheduler.deregister("daily-report").await.unwrap();
    assert!(scheduler.jobs().await.unwrap().is_empty());
    assert!(matches!(
        scheduler.trigger_now("daily-report").await,
        Err(SchedulerError::NotFound(_))
    ));
    // History outlives the definition.
    assert_eq!(scheduler.executions("daily-report").await.unwrap().len(), 1);

    scheduler.shutdown_with_grace(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_defaults_build() {
    let scheduler = Scheduler::builder().build();
    assert!(!scheduler.is_running());
    assert!(scheduler.handlers().is_empty());
    assert!(scheduler.pool().size() >= 1);
    assert!(matches!(
        scheduler.register("a", "not a cron", "q", "p").await,
        Err(SchedulerError::InvalidSchedule { .. })
    ));
}

#[tokio::test]
async fn test_start_after_shutdown_is_rejected() {
    let scheduler = Scheduler::builder().build();
    scheduler.start().unwrap();
    scheduler.start().unwrap();
    assert!(scheduler.is_running());

    assert!(scheduler.shutdown_with_grace(Duration::from_secs(1)).await);
    assert!(matches!(scheduler.start(), Err(SchedulerError::ShutDown)));
    assert!(!scheduler.is_running());
    assert!(!scheduler.pool().is_running());
}
