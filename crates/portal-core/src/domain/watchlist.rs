//! Watchlist sync entities.

use crate::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a whole sync run for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// No item failed.
    Success,
    /// Some items synced and some failed.
    Partial,
    /// Nothing synced and at least one failure, or the run could not start.
    Failed,
}

impl SyncStatus {
    /// Classifies a run from its counts.
    #[must_use]
    pub const fn classify(items_synced: u32, items_failed: u32) -> Self {
        if items_failed == 0 {
            Self::Success
        } else if items_synced == 0 {
            Self::Failed
        } else {
            Self::Partial
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Per-item sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryStatus {
    /// Seen on the watchlist but not requestable yet.
    Synced,
    /// A new downstream request was created.
    Requested,
    /// The media already exists downstream.
    AlreadyAvailable,
    /// Someone already requested the media.
    AlreadyRequested,
    /// The last submission failed.
    Failed,
    /// The item is no longer on the user's watchlist.
    RemovedFromWatchlist,
}

impl HistoryStatus {
    pub const ALL: [Self; 6] = [
        Self::Synced,
        Self::Requested,
        Self::AlreadyAvailable,
        Self::AlreadyRequested,
        Self::Failed,
        Self::RemovedFromWatchlist,
    ];

    /// Terminal statuses are never submitted downstream again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Requested | Self::AlreadyAvailable | Self::AlreadyRequested
        )
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "SYNCED",
            Self::Requested => "REQUESTED",
            Self::AlreadyAvailable => "ALREADY_AVAILABLE",
            Self::AlreadyRequested => "ALREADY_REQUESTED",
            Self::Failed => "FAILED",
            Self::RemovedFromWatchlist => "REMOVED_FROM_WATCHLIST",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown history status: {s}"))
    }
}

/// Media kind of a watchlist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Tv => "tv",
        }
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "movie" => Ok(Self::Movie),
            "tv" | "show" => Ok(Self::Tv),
            other => Err(format!("unknown media type: {other}")),
        }
    }
}

/// One entry of a user's external watchlist snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistItem {
    /// Stable dedup key, unique per user.
    pub key: String,
    pub guid: String,
    pub title: String,
    pub year: Option<i32>,
    pub media_type: MediaType,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub imdb_id: Option<String>,
}

/// Per-user sync settings and running counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistSyncSettings {
    pub user_id: UserId,
    pub sync_enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncStatus>,
    pub last_sync_error: Option<String>,
    pub items_synced_last_run: u32,
    pub items_requested_last_run: u32,
    pub total_items_synced: u64,
    pub total_items_requested: u64,
}

impl WatchlistSyncSettings {
    /// Fresh settings for a user that has never synced.
    #[must_use]
    pub fn new(user_id: UserId, sync_enabled: bool) -> Self {
        Self {
            user_id,
            sync_enabled,
            last_sync_at: None,
            last_sync_status: None,
            last_sync_error: None,
            items_synced_last_run: 0,
            items_requested_last_run: 0,
            total_items_synced: 0,
            total_items_requested: 0,
        }
    }

    /// Folds a finished run into the settings. Totals are only ever added to.
    pub fn apply_run(&mut self, run: &SyncRunRecord) {
        self.last_sync_at = Some(run.finished_at);
        self.last_sync_status = Some(run.status);
        self.last_sync_error.clone_from(&run.error);
        self.items_synced_last_run = run.items_synced;
        self.items_requested_last_run = run.items_requested;
        self.total_items_synced += u64::from(run.items_synced);
        self.total_items_requested += u64::from(run.items_requested);
    }
}

/// Per-user, per-item sync history row. Unique on `(user_id, item_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistSyncHistory {
    pub user_id: UserId,
    pub item_key: String,
    pub guid: String,
    pub title: String,
    pub year: Option<i32>,
    pub media_type: MediaType,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub status: HistoryStatus,
    pub requested_at: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
    pub error: Option<String>,
    pub synced_at: DateTime<Utc>,
}

impl WatchlistSyncHistory {
    /// Builds a history row for `item` with the given outcome.
    #[must_use]
    pub fn for_item(user_id: UserId, item: &WatchlistItem, status: HistoryStatus, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            item_key: item.key.clone(),
            guid: item.guid.clone(),
            title: item.title.clone(),
            year: item.year,
            media_type: item.media_type,
            tmdb_id: item.tmdb_id,
            tvdb_id: item.tvdb_id,
            imdb_id: item.imdb_id.clone(),
            status,
            requested_at: (status == HistoryStatus::Requested).then_some(now),
            request_id: None,
            error: None,
            synced_at: now,
        }
    }
}

/// Everything one sync attempt writes, persisted in a single transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRunRecord {
    pub user_id: UserId,
    pub status: SyncStatus,
    pub error: Option<String>,
    pub items_synced: u32,
    pub items_requested: u32,
    pub finished_at: DateTime<Utc>,
    /// Rows to insert or update, keyed by `(user_id, item_key)`.
    pub history: Vec<WatchlistSyncHistory>,
    /// Keys to mark as removed from the watchlist.
    pub removed_keys: Vec<String>,
}

impl SyncRunRecord {
    /// A failed attempt that never reached the item loop.
    #[must_use]
    pub fn failed(user_id: UserId, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            status: SyncStatus::Failed,
            error: Some(error.into()),
            items_synced: 0,
            items_requested: 0,
            finished_at: now,
            history: Vec::new(),
            removed_keys: Vec::new(),
        }
    }
}

/// Admin-controlled global sync configuration (singleton).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSyncConfig {
    pub sync_enabled: bool,
    pub interval_minutes: u32,
}

impl GlobalSyncConfig {
    pub const MIN_INTERVAL_MINUTES: u32 = 15;
    pub const MAX_INTERVAL_MINUTES: u32 = 1440;
    pub const DEFAULT_INTERVAL_MINUTES: u32 = 60;

    /// The interval as a chrono duration.
    #[must_use]
    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.interval_minutes))
    }
}

impl Default for GlobalSyncConfig {
    fn default() -> Self {
        Self {
            sync_enabled: false,
            interval_minutes: Self::DEFAULT_INTERVAL_MINUTES,
        }
    }
}

/// Aggregate numbers for the admin sync overview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistSyncStats {
    pub users_with_sync_enabled: u64,
    pub total_items_synced: u64,
    pub total_items_requested: u64,
    pub users_with_failed_last_sync: u64,
    /// History row counts keyed by status string.
    pub history_by_status: std::collections::BTreeMap<String, u64>,
    /// Most recent history rows, newest first.
    pub recent_history: Vec<WatchlistSyncHistory>,
}
