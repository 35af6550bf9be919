//! Integration tests for MySqlWatchlistSyncRepository.
//!
//! These tests run against a real MySQL database using testcontainers.
//! Requires Docker to be available on the system.

mod common;

use chrono::{Duration, Utc};
use common::TestDatabase;
use portal_core::{
    GlobalSyncConfig, HistoryStatus, MediaType, SyncRunRecord, SyncStatus, UserId, WatchlistItem,
    WatchlistSyncHistory,
};
use portal_repository::{MySqlWatchlistSyncRepository, WatchlistSyncRepository};

fn item(key: &str, tmdb_id: Option<i64>) -> WatchlistItem {
    WatchlistItem {
        key: key.to_string(),
        guid: format!("plex://movie/{key}"),
        title: format!("Title {key}"),
        year: Some(2020),
        media_type: MediaType::Movie,
        tmdb_id,
        tvdb_id: None,
        imdb_id: None,
    }
}

fn run(user_id: UserId, history: Vec<WatchlistSyncHistory>, synced: u32, requested: u32) -> SyncRunRecord {
    SyncRunRecord {
        user_id,
        status: SyncStatus::Success,
        error: None,
        items_synced: synced,
        items_requested: requested,
        finished_at: Utc::now(),
        history,
        removed_keys: Vec::new(),
    }
}

#[tokio::test]
async fn test_global_config_defaults_then_persists() {
    let db = TestDatabase::new().await;
    let repo = MySqlWatchlistSyncRepository::new(db.pool());

    let config = repo.get_global_config().await.expect("Query failed");
    assert_eq!(config, GlobalSyncConfig::default());

    let saved = repo
        .save_global_config(GlobalSyncConfig {
            sync_enabled: true,
            interval_minutes: 30,
        })
        .await
        .expect("Save failed");
    assert!(saved.sync_enabled);

    let reloaded = repo.get_global_config().await.expect("Query failed");
    assert_eq!(reloaded.interval_minutes, 30);
    assert!(reloaded.sync_enabled);
}

#[tokio::test]
async fn test_record_run_adds_to_totals() {
    let db = TestDatabase::new().await;
    let repo = MySqlWatchlistSyncRepository::new(db.pool());
    let user_id = db.insert_user("alice", Some("token"), false).await;

    repo.set_sync_enabled(user_id, true).await.expect("Toggle failed");

    let first = repo.record_run(&run(user_id, Vec::new(), 3, 2)).await.expect("Record failed");
    assert_eq!(first.total_items_synced, 3);
    assert_eq!(first.total_items_requested, 2);
    assert!(first.sync_enabled);

    let second = repo.record_run(&run(user_id, Vec::new(), 1, 0)).await.expect("Record failed");
    assert_eq!(second.items_synced_last_run, 1);
    assert_eq!(second.items_requested_last_run, 0);
    assert_eq!(second.total_items_synced, 4);
    assert_eq!(second.total_items_requested, 2);
    assert_eq!(second.last_sync_status, Some(SyncStatus::Success));
}

#[tokio::test]
async fn test_history_is_unique_per_user_and_item() {
    let db = TestDatabase::new().await;
    let repo = MySqlWatchlistSyncRepository::new(db.pool());
    let user_id = db.insert_user("bob", Some("token"), false).await;
    let now = Utc::now();

    let mut requested = WatchlistSyncHistory::for_item(user_id, &item("k1", Some(10)), HistoryStatus::Requested, now);
    requested.request_id = Some("77".to_string());
    repo.record_run(&run(user_id, vec![requested], 1, 1)).await.expect("Record failed");

    // A later failed write keeps the earlier request id and timestamp.
    let mut failed = WatchlistSyncHistory::for_item(user_id, &item("k1", Some(10)), HistoryStatus::Failed, now);
    failed.error = Some("boom".to_string());
    repo.record_run(&run(user_id, vec![failed], 0, 0)).await.expect("Record failed");

    let history = repo.find_history(user_id).await.expect("Query failed");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, HistoryStatus::Failed);
    assert_eq!(history[0].request_id.as_deref(), Some("77"));
    assert!(history[0].requested_at.is_some());
    assert_eq!(history[0].error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_removed_keys_are_marked() {
    let db = TestDatabase::new().await;
    let repo = MySqlWatchlistSyncRepository::new(db.pool());
    let user_id = db.insert_user("carol", Some("token"), false).await;
    let now = Utc::now();

    let rows = vec![
        WatchlistSyncHistory::for_item(user_id, &item("keep", Some(1)), HistoryStatus::Requested, now),
        WatchlistSyncHistory::for_item(user_id, &item("gone", Some(2)), HistoryStatus::Requested, now),
    ];
    repo.record_run(&run(user_id, rows, 2, 2)).await.expect("Record failed");

    let mut removal = run(user_id, Vec::new(), 0, 0);
    removal.removed_keys = vec!["gone".to_string()];
    repo.record_run(&removal).await.expect("Record failed");

    let history = repo.find_history(user_id).await.expect("Query failed");
    let gone = history.iter().find(|h| h.item_key == "gone").expect("row missing");
    let keep = history.iter().find(|h| h.item_key == "keep").expect("row missing");
    assert_eq!(gone.status, HistoryStatus::RemovedFromWatchlist);
    assert_eq!(keep.status, HistoryStatus::Requested);
}

#[tokio::test]
async fn test_find_due_users() {
    let db = TestDatabase::new().await;
    let repo = MySqlWatchlistSyncRepository::new(db.pool());
    let never = db.insert_user("never", Some("t"), false).await;
    let stale = db.insert_user("stale", Some("t"), false).await;
    let fresh = db.insert_user("fresh", Some("t"), false).await;
    let disabled = db.insert_user("disabled", Some("t"), false).await;

    for user in [never, stale, fresh] {
        repo.set_sync_enabled(user, true).await.expect("Toggle failed");
    }
    repo.set_sync_enabled(disabled, false).await.expect("Toggle failed");

    let mut stale_run = run(stale, Vec::new(), 0, 0);
    stale_run.finished_at = Utc::now() - Duration::hours(3);
    repo.record_run(&stale_run).await.expect("Record failed");
    repo.record_run(&run(fresh, Vec::new(), 0, 0)).await.expect("Record failed");

    let due = repo
        .find_due_users(Utc::now(), Duration::minutes(60), 50)
        .await
        .expect("Query failed");

    assert_eq!(due, vec![never, stale]);

    let limited = repo
        .find_due_users(Utc::now(), Duration::minutes(60), 1)
        .await
        .expect("Query failed");
    assert_eq!(limited, vec![never]);
}

#[tokio::test]
async fn test_stats_aggregates() {
    let db = TestDatabase::new().await;
    let repo = MySqlWatchlistSyncRepository::new(db.pool());
    let a = db.insert_user("a", Some("t"), false).await;
    let b = db.insert_user("b", Some("t"), false).await;
    let now = Utc::now();

    repo.set_sync_enabled(a, true).await.expect("Toggle failed");
    repo.set_sync_enabled(b, true).await.expect("Toggle failed");

    let rows = vec![
        WatchlistSyncHistory::for_item(a, &item("x", Some(1)), HistoryStatus::Requested, now),
        WatchlistSyncHistory::for_item(a, &item("y", None), HistoryStatus::Synced, now),
    ];
    repo.record_run(&run(a, rows, 2, 1)).await.expect("Record failed");
    repo.record_run(&SyncRunRecord::failed(b, "token rejected", now))
        .await
        .expect("Record failed");

    let stats = repo.stats(10).await.expect("Query failed");
    assert_eq!(stats.users_with_sync_enabled, 2);
    assert_eq!(stats.total_items_synced, 2);
    assert_eq!(stats.total_items_requested, 1);
    assert_eq!(stats.users_with_failed_last_sync, 1);
    assert_eq!(stats.history_by_status.get("REQUESTED"), Some(&1));
    assert_eq!(stats.history_by_status.get("SYNCED"), Some(&1));
    assert_eq!(stats.recent_history.len(), 2);
}
