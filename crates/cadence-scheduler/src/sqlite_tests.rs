use super::*;
use crate::store::conformance;
use chrono::Duration;
use tempfile::TempDir;

async fn store() -> SqliteJobStore {
    SqliteJobStore::in_memory().await.unwrap()
}

#[tokio::test]
async fn test_sqlite_upsert_creates_then_updates() {
    conformance::upsert_creates_then_updates(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_remove_reports_existence() {
    conformance::remove_reports_existence(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_due_is_ordered_and_bounded() {
    conformance::due_is_ordered_and_bounded(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_advance_is_compare_and_swap() {
    conformance::advance_is_compare_and_swap(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_set_enabled_toggles() {
    conformance::set_enabled_toggles(&store().await).await;
}

#[tokio::test]
async fn test_sqlite_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cadence.db");
    let fire = conformance::t0() + Duration::hours(1);

    {
        let store = SqliteJobStore::open(&path).await.unwrap();
        store.upsert(&conformance::job("daily-report", fire)).await.unwrap();
        store
            .advance("daily-report", fire, fire + Duration::days(1), fire)
            .await
            .unwrap();
    }

    let reopened = SqliteJobStore::open(&path).await.unwrap();
    let loaded = reopened.get("daily-report").await.unwrap().unwrap();
    assert_eq!(loaded.next_fire_at, fire + Duration::days(1));
    assert_eq!(loaded.last_enqueued_at, Some(fire));
    assert_eq!(loaded.schedule, "0 2 * * *");
}

#[tokio::test]
async fn test_sqlite_two_connections_advance_once() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cadence.db");
    let fire = conformance::t0() + Duration::hours(1);

    let a = SqliteJobStore::open(&path).await.unwrap();
    let b = SqliteJobStore::open(&path).await.unwrap();
    a.upsert(&conformance::job("daily-report", fire)).await.unwrap();

    let next = fire + Duration::days(1);
    let (won_a, won_b) = tokio::join!(
        a.advance("daily-report", fire, next, fire),
        b.advance("daily-report", fire, next, fire),
    );
    assert!(won_a.unwrap() ^ won_b.unwrap());
}
