//! Portal Watchlist - Plex Watchlist Sync
//!
//! Pulls each opted-in user's Plex watchlist and files a media request in
//! the active request service (Overseerr or Jellyseerr) for every title
//! not yet requested or available.
//!
//! # Flow
//!
//! ```text
//!  recurring schedule / admin trigger
//!         │ enqueue (unique per user)
//!         ▼
//!  SyncAllDueUsersHandler ──► WatchlistSyncService::sync_all_due
//!                                   │ one user at a time
//!                                   ▼
//!                     sync_user (per-user lease)
//!                       ├─ PlexWatchlistClient   validate token, fetch items
//!                       ├─ history lookup        skip terminal items
//!                       ├─ OverseerrClient       submit request
//!                       └─ record_run            history + totals
//! ```
//!
//! Every entry point honours the global kill switch.

pub mod clients;
pub mod dto;
pub mod jobs;
pub mod metrics;
pub mod service;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use clients::{
    MediaRequest, OverseerrClient, PlexWatchlistClient, RequestSubmitter, SubmitOutcome, WatchlistSource,
};
pub use dto::{
    SyncAllResult, SyncResult, TriggerSyncRequest, UpdateGlobalSyncSettingsRequest, UpdateUserSyncSettingsRequest,
};
pub use jobs::{job_handlers, user_job_key, WatchlistJobs, SYNC_ALL_SCHEDULE_ID};
pub use metrics::{register_metrics, SyncMetrics};
pub use service::{SyncDependencies, WatchlistSyncService};
