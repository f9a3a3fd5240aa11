//! End-to-end tests for leasing, worker pools and lease recovery.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use cadence_workqueue::{
    Clock, ExecutionFailure, ExecutionRecord, ExecutionRunner, ExecutionState, ExecutionStore,
    FailurePolicy, HandlerRegistry, JobContext, JobHandler, LeaseReclaimer, ManualClock,
    MemoryExecutionStore, QueueConfig, RetryConfig, SqliteExecutionStore, SystemClock,
    TracingEventSink, WorkQueue, WorkerConfig, WorkerPool,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Counts runs and tracks the highest number of overlapping runs.
#[derive(Default)]
struct CountingHandler {
    runs: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    hold: Duration,
}

impl CountingHandler {
    fn holding(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            hold,
            ..Default::default()
        })
    }
}

#[async_trait]
impl JobHandler for CountingHandler {
    async fn run(&self, _ctx: JobContext) -> Result<(), ExecutionFailure> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn pool(
    name: &str,
    queue: Arc<WorkQueue>,
    handlers: Arc<HandlerRegistry>,
    workers: u32,
) -> WorkerPool {
    let runner = Arc::new(ExecutionRunner::new(
        queue.clone(),
        handlers,
        Duration::from_secs(30),
        None,
    ));
    WorkerPool::new(
        name,
        WorkerConfig {
            max_workers: Some(workers),
            queues: vec!["reports".to_string()],
            idle_poll_ms: 10,
            ..Default::default()
        },
        queue,
        runner,
        Arc::new(FailurePolicy::default()),
    )
}

async fn wait_for_state(queue: &WorkQueue, id: uuid::Uuid, state: ExecutionState) {
    for _ in 0..500 {
        if queue.get(id).await.unwrap().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {id} never reached {state}");
}

fn record(job_id: &str, clock: &dyn Clock) -> ExecutionRecord {
    let now = clock.now();
    ExecutionRecord::new(job_id, "reports", "report", now, now)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_processes_race_for_one_execution() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cadence.db");

    // Two independent connections to one database, as two processes would have.
    let a: Arc<dyn ExecutionStore> = Arc::new(SqliteExecutionStore::open(&path).await.unwrap());
    let b: Arc<dyn ExecutionStore> = Arc::new(SqliteExecutionStore::open(&path).await.unwrap());

    let clock = SystemClock;
    a.insert(&record("daily-report", &clock)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = if i % 2 == 0 { a.clone() } else { b.clone() };
        handles.push(tokio::spawn(async move {
            store
                .lease_next(
                    "reports",
                    &format!("worker-{i}"),
                    Utc::now(),
                    chrono::Duration::seconds(30),
                )
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_pools_run_an_execution_once() {
    let queue = Arc::new(WorkQueue::in_memory());
    let handler = CountingHandler::holding(Duration::from_millis(50));
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register("report", handler.clone());

    let first = pool("a", queue.clone(), handlers.clone(), 2);
    let second = pool("b", queue.clone(), handlers.clone(), 2);
    first.start();
    second.start();

    let id = queue
        .enqueue("reports", record("daily-report", &SystemClock))
        .await
        .unwrap();
    wait_for_state(&queue, id, ExecutionState::Succeeded).await;

    assert!(first.shutdown(Duration::from_secs(1)).await);
    assert!(second.shutdown(Duration::from_secs(1)).await);
    assert_eq!(handler.runs.load(Ordering::SeqCst), 1);
    assert_eq!(first.total_processed() + second.total_processed(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_job_never_runs_concurrently() {
    let queue = Arc::new(WorkQueue::in_memory());
    let handler = CountingHandler::holding(Duration::from_millis(30));
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register("report", handler.clone());

    let pool = pool("p", queue.clone(), handlers, 4);
    pool.start();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            queue
                .enqueue("reports", record("daily-report", &SystemClock))
                .await
                .unwrap(),
        );
    }
    for id in &ids {
        wait_for_state(&queue, *id, ExecutionState::Succeeded).await;
    }

    assert!(pool.shutdown(Duration::from_secs(1)).await);
    assert_eq!(handler.runs.load(Ordering::SeqCst), 4);
    assert_eq!(handler.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn crashed_worker_is_recovered_by_another() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 15, 2, 0, 0).unwrap(),
    ));
    let queue = Arc::new(WorkQueue::new(
        Arc::new(MemoryExecutionStore::new()),
        clock.clone(),
        Arc::new(TracingEventSink),
    ));
    let policy = Arc::new(FailurePolicy::new(RetryConfig::default()));
    let reclaimer = LeaseReclaimer::new(queue.clone(), policy, QueueConfig::default());

    let id = queue
        .enqueue("reports", record("daily-report", clock.as_ref()))
        .await
        .unwrap();

    // Worker A leases and dies without completing.
    let crashed = queue
        .lease("reports", "worker-a", Duration::from_secs(300))
        .await
        .unwrap()
        .unwrap();
    queue.start(crashed.lease.token).await.unwrap();

    clock.advance(chrono::Duration::seconds(301));
    let report = reclaimer.sweep().await.unwrap();
    assert_eq!(report.requeued, 1);

    // Worker B picks it up as attempt 2 and finishes it.
    let handler = CountingHandler::holding(Duration::from_millis(1));
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register("report", handler.clone());
    let pool = pool("b", queue.clone(), handlers, 1);
    pool.start();
    wait_for_state(&queue, id, ExecutionState::Succeeded).await;
    assert!(pool.shutdown(Duration::from_secs(1)).await);

    let record = queue.get(id).await.unwrap();
    assert_eq!(record.attempt, 2);
    assert_eq!(record.lease_owner.as_deref(), Some("b-worker-0"));
    assert_eq!(handler.runs.load(Ordering::SeqCst), 1);

    // Worker A's late completion is rejected.
    let late = queue
        .complete(crashed.lease.token, cadence_workqueue::Completion::Succeeded)
        .await;
    assert!(matches!(
        late,
        Err(cadence_workqueue::QueueError::LeaseConflict { .. })
    ));
}

#[tokio::test]
async fn poisoned_payload_is_abandoned_after_max_attempts() {
    struct AlwaysTransient;

    #[async_trait]
    impl JobHandler for AlwaysTransient {
        async fn run(&self, _ctx: JobContext) -> Result<(), ExecutionFailure> {
            Err(ExecutionFailure::transient("upstream unavailable"))
        }
    }

    let queue = Arc::new(WorkQueue::in_memory());
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register("report", Arc::new(AlwaysTransient));
    let runner = Arc::new(ExecutionRunner::new(
        queue.clone(),
        handlers,
        Duration::from_secs(30),
        None,
    ));
    let pool = WorkerPool::new(
        "p",
        WorkerConfig {
            max_workers: Some(1),
            queues: vec!["reports".to_string()],
            idle_poll_ms: 10,
            ..Default::default()
        },
        queue.clone(),
        runner,
        Arc::new(FailurePolicy::new(RetryConfig {
            max_attempts: 3,
            backoff_base_secs: 0,
            backoff_max_secs: 0,
        })),
    );
    pool.start();

    let id = queue
        .enqueue("reports", record("daily-report", &SystemClock))
        .await
        .unwrap();
    wait_for_state(&queue, id, ExecutionState::Abandoned).await;
    assert!(pool.shutdown(Duration::from_secs(1)).await);

    let record = queue.get(id).await.unwrap();
    assert_eq!(record.attempt, 3);
    assert!(record.last_error.unwrap().contains("upstream unavailable"));
    assert_eq!(pool.workers()[0].executions_failed(), 3);
}
