use super::*;
use crate::conformance;
use tempfile::TempDir;

async fn store() -> SqliteExecutionStore {
    SqliteExecutionStore::in_memory().await.unwrap()
}

#[tokio::test]
async fn test_sqlite_lease_transitions_pending_to_leased() {
    conformance::lease_transitions_pending_to_leased(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_lease_respects_queue_partition() {
    conformance::lease_respects_queue_partition(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_lease_is_fifo() {
    conformance::lease_is_fifo(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_lease_enforces_single_flight() {
    conformance::lease_enforces_single_flight(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_lease_respects_backoff_gate() {
    conformance::lease_respects_backoff_gate(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_start_renew_finish() {
    conformance::start_renew_finish(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_expired_token_conflicts() {
    conformance::expired_token_conflicts(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_retry_requeues_with_next_attempt() {
    conformance::retry_requeues_with_next_attempt(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_reclaim_once_per_timeout() {
    conformance::reclaim_once_per_timeout(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_abandon_expired_lease() {
    conformance::abandon_expired_lease(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_counts_and_purge() {
    conformance::counts_and_purge(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_list_for_job_in_order() {
    conformance::list_for_job_in_order(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cadence.db");
    let record = conformance::pending("nightly", "reports", conformance::t0());

    {
        let store = SqliteExecutionStore::open(&path).await.unwrap();
        store.insert(&record).await.unwrap();
        store
            .lease_next("reports", "worker-1", conformance::t0(), Duration::seconds(30))
            .await
            .unwrap()
            .unwrap();
    }

    let reopened = SqliteExecutionStore::open(&path).await.unwrap();
    let loaded = reopened.get(record.id).await.unwrap().unwrap();
    assert_eq!(loaded.job_id, "nightly");
    assert_eq!(loaded.state, ExecutionState::Leased);
    assert_eq!(loaded.fire_time, record.fire_time);
    assert_eq!(loaded.lease_owner.as_deref(), Some("worker-1"));
}
