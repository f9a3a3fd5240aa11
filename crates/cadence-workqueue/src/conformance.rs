//! Behaviour every `ExecutionStore` implementation must share.

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::error::QueueError;
use crate::execution::{Completion, ExecutionRecord, ExecutionState};
use crate::store::ExecutionStore;

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 2, 0, 0).unwrap()
}

pub(crate) fn pending(job_id: &str, queue: &str, enqueued_at: DateTime<Utc>) -> ExecutionRecord {
    ExecutionRecord::new(job_id, queue, "builtin:log", enqueued_at, enqueued_at)
}

pub(crate) async fn lease_transitions_pending_to_leased(store: &dyn ExecutionStore) {
    let record = pending("daily-report", "reports", t0());
    store.insert(&record).await.unwrap();

    let leased = store
        .lease_next("reports", "worker-1", t0(), Duration::seconds(30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(leased.id, record.id);
    assert_eq!(leased.state, ExecutionState::Leased);
    assert_eq!(leased.lease_owner.as_deref(), Some("worker-1"));
    assert_eq!(leased.lease_expires_at, Some(t0() + Duration::seconds(30)));
    assert!(leased.lease_token.is_some());

    // Nothing else to lease.
    let next = store
        .lease_next("reports", "worker-2", t0(), Duration::seconds(30))
        .await
        .unwrap();
    assert!(next.is_none());
}

pub(crate) async fn lease_respects_queue_partition(store: &dyn ExecutionStore) {
    store.insert(&pending("a", "reports", t0())).await.unwrap();

    let other = store
        .lease_next("billing", "worker-1", t0(), Duration::seconds(30))
        .await
        .unwrap();
    assert!(other.is_none());

    let same = store
        .lease_next("reports", "worker-1", t0(), Duration::seconds(30))
        .await
        .unwrap();
    assert!(same.is_some());
}

pub(crate) async fn lease_is_fifo(store: &dyn ExecutionStore) {
    let first = pending("first", "q", t0());
    let second = pending("second", "q", t0() + Duration::seconds(1));
    store.insert(&second).await.unwrap();
    store.insert(&first).await.unwrap();

    let now = t0() + Duration::seconds(5);
    let a = store.lease_next("q", "w", now, Duration::seconds(30)).await.unwrap().unwrap();
    let b = store.lease_next("q", "w", now, Duration::seconds(30)).await.unwrap().unwrap();
    assert_eq!(a.job_id, "first");
    assert_eq!(b.job_id, "second");
}

pub(crate) async fn lease_enforces_single_flight(store: &dyn ExecutionStore) {
    let older = pending("sync", "q", t0());
    let newer = pending("sync", "q", t0() + Duration::seconds(1));
    let unrelated = pending("other", "q", t0() + Duration::seconds(2));
    store.insert(&older).await.unwrap();
    store.insert(&newer).await.unwrap();
    store.insert(&unrelated).await.unwrap();

    let now = t0() + Duration::seconds(5);
    let first = store.lease_next("q", "w1", now, Duration::seconds(30)).await.unwrap().unwrap();
    assert_eq!(first.id, older.id);

    // The second "sync" record is skipped, the unrelated job is leased instead.
    let second = store.lease_next("q", "w2", now, Duration::seconds(30)).await.unwrap().unwrap();
    assert_eq!(second.id, unrelated.id);

    assert!(store.lease_next("q", "w3", now, Duration::seconds(30)).await.unwrap().is_none());
    let blocked = store.get(newer.id).await.unwrap().unwrap();
    assert_eq!(blocked.state, ExecutionState::Pending);

    // Once the first finishes, the blocked sibling becomes leasable.
    let token = first.lease_token.unwrap();
    store.finish(token, &Completion::Succeeded, now).await.unwrap();
    let third = store.lease_next("q", "w3", now, Duration::seconds(30)).await.unwrap().unwrap();
    assert_eq!(third.id, newer.id);
}

pub(crate) async fn lease_respects_backoff_gate(store: &dyn ExecutionStore) {
    let mut record = pending("gated", "q", t0());
    record.available_at = t0() + Duration::seconds(60);
    store.insert(&record).await.unwrap();

    assert!(store.lease_next("q", "w", t0(), Duration::seconds(30)).await.unwrap().is_none());
    let later = t0() + Duration::seconds(60);
    assert!(store.lease_next("q", "w", later, Duration::seconds(30)).await.unwrap().is_some());
}

pub(crate) async fn start_renew_finish(store: &dyn ExecutionStore) {
    store.insert(&pending("job", "q", t0())).await.unwrap();
    let leased = store.lease_next("q", "w", t0(), Duration::seconds(30)).await.unwrap().unwrap();
    let token = leased.lease_token.unwrap();

    let running = store.start(token, t0() + Duration::seconds(1)).await.unwrap();
    assert_eq!(running.state, ExecutionState::Running);
    assert_eq!(running.started_at, Some(t0() + Duration::seconds(1)));

    // Starting twice is a conflict.
    assert!(matches!(
        store.start(token, t0() + Duration::seconds(2)).await,
        Err(QueueError::LeaseConflict { .. })
    ));

    let renewed = store
        .renew(token, Duration::seconds(30), t0() + Duration::seconds(20))
        .await
        .unwrap();
    assert_eq!(renewed.lease_expires_at, Some(t0() + Duration::seconds(50)));

    let done = store
        .finish(token, &Completion::Failed("bad input".into()), t0() + Duration::seconds(40))
        .await
        .unwrap();
    assert_eq!(done.state, ExecutionState::Failed);
    assert_eq!(done.last_error.as_deref(), Some("bad input"));
    assert_eq!(done.finished_at, Some(t0() + Duration::seconds(40)));

    // Terminal: further use of the token conflicts.
    assert!(matches!(
        store.finish(token, &Completion::Succeeded, t0() + Duration::seconds(41)).await,
        Err(QueueError::LeaseConflict { .. })
    ));
}

pub(crate) async fn expired_token_conflicts(store: &dyn ExecutionStore) {
    store.insert(&pending("job", "q", t0())).await.unwrap();
    let leased = store.lease_next("q", "w", t0(), Duration::seconds(30)).await.unwrap().unwrap();
    let token = leased.lease_token.unwrap();
    let late = t0() + Duration::seconds(30);

    assert!(matches!(
        store.renew(token, Duration::seconds(30), late).await,
        Err(QueueError::LeaseConflict { .. })
    ));
    assert!(matches!(
        store.finish(token, &Completion::Succeeded, late).await,
        Err(QueueError::LeaseConflict { .. })
    ));
    assert!(matches!(
        store.finish(Uuid::new_v4(), &Completion::Succeeded, t0()).await,
        Err(QueueError::LeaseConflict { .. })
    ));
}

pub(crate) async fn retry_requeues_with_next_attempt(store: &dyn ExecutionStore) {
    store.insert(&pending("job", "q", t0())).await.unwrap();
    let leased = store.lease_next("q", "w", t0(), Duration::seconds(30)).await.unwrap().unwrap();
    let token = leased.lease_token.unwrap();

    let gate = t0() + Duration::seconds(10);
    let retried = store.retry(token, "connection reset", gate, t0()).await.unwrap();
    assert_eq!(retried.state, ExecutionState::Pending);
    assert_eq!(retried.attempt, 2);
    assert_eq!(retried.available_at, gate);
    assert!(retried.lease_token.is_none());
    assert_eq!(retried.last_error.as_deref(), Some("connection reset"));

    assert!(store.lease_next("q", "w", t0(), Duration::seconds(30)).await.unwrap().is_none());
    let again = store.lease_next("q", "w", gate, Duration::seconds(30)).await.unwrap().unwrap();
    assert_eq!(again.id, leased.id);
    assert_eq!(again.attempt, 2);
}

pub(crate) async fn reclaim_once_per_timeout(store: &dyn ExecutionStore) {
    store.insert(&pending("job", "q", t0())).await.unwrap();
    let leased = store.lease_next("q", "w", t0(), Duration::seconds(30)).await.unwrap().unwrap();
    let token = leased.lease_token.unwrap();

    assert!(store.expired(t0() + Duration::seconds(29)).await.unwrap().is_empty());

    let after = t0() + Duration::seconds(31);
    let expired = store.expired(after).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, leased.id);

    assert!(store.reclaim(leased.id, token, after).await.unwrap());
    // A second reclaim with the same observation is a no-op.
    assert!(!store.reclaim(leased.id, token, after).await.unwrap());

    let record = store.get(leased.id).await.unwrap().unwrap();
    assert_eq!(record.state, ExecutionState::Pending);
    assert_eq!(record.attempt, 2);
    assert!(record.lease_token.is_none());

    // The old token is dead.
    assert!(matches!(
        store.finish(token, &Completion::Succeeded, after).await,
        Err(QueueError::LeaseConflict { .. })
    ));
}

pub(crate) async fn abandon_expired_lease(store: &dyn ExecutionStore) {
    store.insert(&pending("job", "q", t0())).await.unwrap();
    let leased = store.lease_next("q", "w", t0(), Duration::seconds(30)).await.unwrap().unwrap();
    let token = leased.lease_token.unwrap();

    // Not expired yet.
    assert!(!store.abandon(leased.id, token, "gave up", t0()).await.unwrap());

    let after = t0() + Duration::seconds(45);
    assert!(store.abandon(leased.id, token, "gave up", after).await.unwrap());
    let record = store.get(leased.id).await.unwrap().unwrap();
    assert_eq!(record.state, ExecutionState::Abandoned);
    assert_eq!(record.finished_at, Some(after));
    assert!(store.expired(after).await.unwrap().is_empty());
}

pub(crate) async fn counts_and_purge(store: &dyn ExecutionStore) {
    store.insert(&pending("a", "q", t0())).await.unwrap();
    store.insert(&pending("b", "q", t0())).await.unwrap();
    let leased = store.lease_next("q", "w", t0(), Duration::seconds(30)).await.unwrap().unwrap();
    store
        .finish(leased.lease_token.unwrap(), &Completion::Succeeded, t0())
        .await
        .unwrap();

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.get(&ExecutionState::Succeeded), Some(&1));
    assert_eq!(counts.get(&ExecutionState::Pending), Some(&1));

    assert_eq!(store.purge_finished(t0()).await.unwrap(), 0);
    assert_eq!(store.purge_finished(t0() + Duration::seconds(1)).await.unwrap(), 1);
    assert!(store.get(leased.id).await.unwrap().is_none());

    let remaining = store.counts().await.unwrap();
    assert_eq!(remaining.get(&ExecutionState::Succeeded), None);
    assert_eq!(remaining.get(&ExecutionState::Pending), Some(&1));
}

pub(crate) async fn list_for_job_in_order(store: &dyn ExecutionStore) {
    let first = pending("job", "q", t0());
    let second = pending("job", "q", t0() + Duration::seconds(60));
    store.insert(&second).await.unwrap();
    store.insert(&first).await.unwrap();
    store.insert(&pending("other", "q", t0())).await.unwrap();

    let list = store.list_for_job("job").await.unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, first.id);
    assert_eq!(list[1].id, second.id);
}
