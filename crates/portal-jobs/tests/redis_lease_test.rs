//! Integration tests for the Redis lease store and leader election.

mod common;

use common::TestRedis;
use portal_core::LeaseStore;
use portal_jobs::LeaderElector;
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_single_holder() {
    let redis = TestRedis::new().await;
    let store = redis.lease_store();

    assert!(store.try_acquire("background-worker", "a", TTL).await.unwrap());
    assert!(!store.try_acquire("background-worker", "b", TTL).await.unwrap());
    assert!(store.try_acquire("background-worker", "a", TTL).await.unwrap());

    let lease = store.current("background-worker").await.unwrap().unwrap();
    assert_eq!(lease.holder_id, "a");
    assert!(lease.expires_at > lease.acquired_at);
}

#[tokio::test]
async fn test_concurrent_acquire_has_one_winner() {
    let redis = TestRedis::new().await;
    let store = Arc::new(redis.lease_store());

    let attempts = (0..8).map(|i| {
        let store = store.clone();
        async move { store.try_acquire("background-worker", &format!("holder-{i}"), TTL).await.unwrap() }
    });
    let results = futures::future::join_all(attempts).await;

    assert_eq!(results.into_iter().filter(|won| *won).count(), 1);
}

#[tokio::test]
async fn test_renew_and_release_only_by_holder() {
    let redis = TestRedis::new().await;
    let store = redis.lease_store();
    store.try_acquire("background-worker", "a", TTL).await.unwrap();

    assert!(!store.renew("background-worker", "b", TTL).await.unwrap());
    assert!(!store.release("background-worker", "b").await.unwrap());
    assert!(store.renew("background-worker", "a", TTL).await.unwrap());
    assert!(store.release("background-worker", "a").await.unwrap());
    assert!(store.current("background-worker").await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_lease_is_taken_over() {
    let redis = TestRedis::new().await;
    let store = redis.lease_store();

    assert!(store
        .try_acquire("background-worker", "a", Duration::from_millis(100))
        .await
        .unwrap());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(store.try_acquire("background-worker", "b", TTL).await.unwrap());
    assert!(!store.renew("background-worker", "a", TTL).await.unwrap());
}

#[tokio::test]
async fn test_leader_election_over_redis() {
    let redis = TestRedis::new().await;
    let store: Arc<dyn LeaseStore> = Arc::new(redis.lease_store());
    let interval = Duration::from_millis(50);

    let a = LeaderElector::with_timing(store.clone(), "background-worker", TTL, interval, interval);
    let b = LeaderElector::with_timing(store, "background-worker", TTL, interval, interval);

    assert!(a.tick().await);
    assert!(!b.tick().await);

    a.release().await;
    assert!(b.tick().await);
}
