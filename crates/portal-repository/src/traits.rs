//! Repository traits consumed by the job and sync layers.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use portal_core::{
    GlobalSyncConfig, PortalResult, PortalUser, RequestServiceConfig, SyncRunRecord, UserId,
    WatchlistSyncHistory, WatchlistSyncSettings, WatchlistSyncStats,
};

/// Read access to portal users.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Finds a user by ID.
    async fn find_by_id(&self, id: UserId) -> PortalResult<Option<PortalUser>>;
}

/// Read access to downstream request-service configuration.
#[async_trait]
pub trait RequestServiceRepository: Send + Sync {
    /// Returns the active request service, if one is configured.
    async fn find_active(&self) -> PortalResult<Option<RequestServiceConfig>>;
}

/// Persistence for watchlist sync state.
#[async_trait]
pub trait WatchlistSyncRepository: Send + Sync {
    /// Returns the global config, or the default when never configured.
    async fn get_global_config(&self) -> PortalResult<GlobalSyncConfig>;

    /// Upserts the global config singleton.
    async fn save_global_config(&self, config: GlobalSyncConfig) -> PortalResult<GlobalSyncConfig>;

    /// Finds a user's sync settings.
    async fn find_settings(&self, user_id: UserId) -> PortalResult<Option<WatchlistSyncSettings>>;

    /// Upserts a user's opt-in flag, creating the settings row if needed.
    async fn set_sync_enabled(&self, user_id: UserId, enabled: bool) -> PortalResult<WatchlistSyncSettings>;

    /// Returns every history row of a user.
    async fn find_history(&self, user_id: UserId) -> PortalResult<Vec<WatchlistSyncHistory>>;

    /// Persists one sync attempt atomically: history upserts, removals and
    /// the additive settings update either all land or none do.
    async fn record_run(&self, run: &SyncRunRecord) -> PortalResult<WatchlistSyncSettings>;

    /// Users with sync enabled whose last sync is missing or older than
    /// `now - interval`, oldest first.
    async fn find_due_users(
        &self,
        now: DateTime<Utc>,
        interval: Duration,
        limit: u32,
    ) -> PortalResult<Vec<UserId>>;

    /// Aggregate numbers plus the most recent history rows.
    async fn stats(&self, recent_limit: u32) -> PortalResult<WatchlistSyncStats>;
}
