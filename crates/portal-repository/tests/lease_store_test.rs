//! Integration tests for MySqlLeaseStore.

mod common;

use common::TestDatabase;
use portal_core::LeaseStore;
use portal_repository::MySqlLeaseStore;
use std::time::Duration;

const LOCK: &str = "background-worker";

#[tokio::test]
async fn test_only_one_holder_acquires() {
    let db = TestDatabase::new().await;
    let store = MySqlLeaseStore::new(db.pool());

    assert!(store.try_acquire(LOCK, "a", Duration::from_secs(30)).await.unwrap());
    assert!(!store.try_acquire(LOCK, "b", Duration::from_secs(30)).await.unwrap());

    let lease = store.current(LOCK).await.unwrap().expect("lease missing");
    assert_eq!(lease.holder_id, "a");
}

#[tokio::test]
async fn test_concurrent_acquire_has_single_winner() {
    let db = TestDatabase::new().await;
    let store = MySqlLeaseStore::new(db.pool());

    let attempts = (0..8).map(|i| {
        let store = store.clone();
        async move { store.try_acquire(LOCK, &format!("holder-{i}"), Duration::from_secs(30)).await }
    });
    let results = futures::future::join_all(attempts).await;

    let winners = results.into_iter().filter(|r| matches!(r, Ok(true))).count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_same_holder_reacquires() {
    let db = TestDatabase::new().await;
    let store = MySqlLeaseStore::new(db.pool());

    assert!(store.try_acquire(LOCK, "a", Duration::from_secs(30)).await.unwrap());
    assert!(store.try_acquire(LOCK, "a", Duration::from_secs(30)).await.unwrap());
}

#[tokio::test]
async fn test_expired_lease_can_be_taken_over() {
    let db = TestDatabase::new().await;
    let store = MySqlLeaseStore::new(db.pool());

    assert!(store.try_acquire(LOCK, "a", Duration::from_millis(200)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(store.try_acquire(LOCK, "b", Duration::from_secs(30)).await.unwrap());
    assert!(!store.renew(LOCK, "a", Duration::from_secs(30)).await.unwrap());
}

#[tokio::test]
async fn test_release_only_by_holder() {
    let db = TestDatabase::new().await;
    let store = MySqlLeaseStore::new(db.pool());

    assert!(store.try_acquire(LOCK, "a", Duration::from_secs(30)).await.unwrap());
    assert!(!store.release(LOCK, "b").await.unwrap());
    assert!(store.current(LOCK).await.unwrap().is_some());

    assert!(store.renew(LOCK, "a", Duration::from_secs(30)).await.unwrap());
    assert!(store.release(LOCK, "a").await.unwrap());
    assert!(store.current(LOCK).await.unwrap().is_none());
    assert!(store.try_acquire(LOCK, "b", Duration::from_secs(30)).await.unwrap());
}
