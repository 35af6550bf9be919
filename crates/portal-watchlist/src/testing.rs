//! In-memory repositories and canned clients for the sync tests.

use crate::clients::{MediaRequest, RequestSubmitter, SubmitOutcome, WatchlistSource};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use portal_core::{
    GlobalSyncConfig, HistoryStatus, MediaType, PortalError, PortalResult, PortalUser, RequestServiceConfig,
    RequestServiceKind, SyncRunRecord, UserId, WatchlistItem, WatchlistSyncHistory, WatchlistSyncSettings,
    WatchlistSyncStats,
};
use portal_repository::{RequestServiceRepository, UserRepository, WatchlistSyncRepository};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

pub fn user(token: Option<&str>) -> PortalUser {
    PortalUser {
        id: UserId::new(),
        username: "alice".to_string(),
        email: None,
        plex_token: token.map(ToString::to_string),
        is_admin: false,
    }
}

pub fn item(key: &str, tmdb_id: Option<i64>) -> WatchlistItem {
    WatchlistItem {
        key: key.to_string(),
        guid: format!("plex://movie/{key}"),
        title: format!("Movie {key}"),
        year: Some(2001),
        media_type: MediaType::Movie,
        tmdb_id,
        tvdb_id: None,
        imdb_id: None,
    }
}

pub fn request_service() -> RequestServiceConfig {
    RequestServiceConfig {
        id: 1,
        kind: RequestServiceKind::Overseerr,
        name: "Overseerr".to_string(),
        url: "http://overseerr.local".to_string(),
        api_key: "key".to_string(),
        is_active: true,
    }
}

#[derive(Default)]
pub struct FakeUsers {
    users: Mutex<HashMap<UserId, PortalUser>>,
}

impl FakeUsers {
    pub fn insert(&self, user: PortalUser) -> UserId {
        let id = user.id;
        self.users.lock().insert(id, user);
        id
    }
}

#[async_trait]
impl UserRepository for FakeUsers {
    async fn find_by_id(&self, id: UserId) -> PortalResult<Option<PortalUser>> {
        Ok(self.users.lock().get(&id).cloned())
    }
}

pub struct FakeRequestServices {
    active: Mutex<Option<RequestServiceConfig>>,
}

impl FakeRequestServices {
    pub fn with(active: Option<RequestServiceConfig>) -> Self {
        Self {
            active: Mutex::new(active),
        }
    }

    pub fn set(&self, active: Option<RequestServiceConfig>) {
        *self.active.lock() = active;
    }
}

#[async_trait]
impl RequestServiceRepository for FakeRequestServices {
    async fn find_active(&self) -> PortalResult<Option<RequestServiceConfig>> {
        Ok(self.active.lock().clone())
    }
}

#[derive(Default)]
struct SyncState {
    global: GlobalSyncConfig,
    settings: HashMap<UserId, WatchlistSyncSettings>,
    history: HashMap<(UserId, String), WatchlistSyncHistory>,
    record_conflict: Option<String>,
}

/// Mirrors the MySQL repository: history upserts by `(user, key)` and
/// additive totals.
#[derive(Default)]
pub struct FakeSyncRepository {
    state: Mutex<SyncState>,
}

impl FakeSyncRepository {
    /// Repository with global sync switched on.
    pub fn enabled() -> Self {
        let repo = Self::default();
        repo.set_global(GlobalSyncConfig {
            sync_enabled: true,
            interval_minutes: GlobalSyncConfig::DEFAULT_INTERVAL_MINUTES,
        });
        repo
    }

    pub fn set_global(&self, config: GlobalSyncConfig) {
        self.state.lock().global = config;
    }

    /// Makes every `record_run` fail the way a unique-key violation does.
    pub fn reject_runs(&self, reason: &str) {
        self.state.lock().record_conflict = Some(reason.to_string());
    }

    pub fn settings(&self, user_id: UserId) -> Option<WatchlistSyncSettings> {
        self.state.lock().settings.get(&user_id).cloned()
    }

    pub fn history(&self, user_id: UserId) -> Vec<WatchlistSyncHistory> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .history
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.item_key.cmp(&b.item_key));
        rows
    }
}

#[async_trait]
impl WatchlistSyncRepository for FakeSyncRepository {
    async fn get_global_config(&self) -> PortalResult<GlobalSyncConfig> {
        Ok(self.state.lock().global)
    }

    async fn save_global_config(&self, config: GlobalSyncConfig) -> PortalResult<GlobalSyncConfig> {
        self.state.lock().global = config;
        Ok(config)
    }

    async fn find_settings(&self, user_id: UserId) -> PortalResult<Option<WatchlistSyncSettings>> {
        Ok(self.settings(user_id))
    }

    async fn set_sync_enabled(&self, user_id: UserId, enabled: bool) -> PortalResult<WatchlistSyncSettings> {
        let mut state = self.state.lock();
        let settings = state
            .settings
            .entry(user_id)
            .or_insert_with(|| WatchlistSyncSettings::new(user_id, enabled));
        settings.sync_enabled = enabled;
        Ok(settings.clone())
    }

    async fn find_history(&self, user_id: UserId) -> PortalResult<Vec<WatchlistSyncHistory>> {
        Ok(self.history(user_id))
    }

    async fn record_run(&self, run: &SyncRunRecord) -> PortalResult<WatchlistSyncSettings> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.record_conflict {
            return Err(PortalError::InvalidState(reason.clone()));
        }

        for row in &run.history {
            let key = (row.user_id, row.item_key.clone());
            let mut row = row.clone();
            if let Some(existing) = state.history.get(&key) {
                row.requested_at = row.requested_at.or(existing.requested_at);
                row.request_id = row.request_id.take().or_else(|| existing.request_id.clone());
            }
            state.history.insert(key, row);
        }

        for key in &run.removed_keys {
            if let Some(row) = state.history.get_mut(&(run.user_id, key.clone())) {
                row.status = HistoryStatus::RemovedFromWatchlist;
                row.synced_at = run.finished_at;
            }
        }

        let settings = state
            .settings
            .entry(run.user_id)
            .or_insert_with(|| WatchlistSyncSettings::new(run.user_id, false));
        settings.apply_run(run);
        Ok(settings.clone())
    }

    async fn find_due_users(&self, now: DateTime<Utc>, interval: Duration, limit: u32) -> PortalResult<Vec<UserId>> {
        let threshold = now - interval;
        let state = self.state.lock();
        let mut due: Vec<_> = state
            .settings
            .values()
            .filter(|s| s.sync_enabled && s.last_sync_at.map_or(true, |at| at < threshold))
            .map(|s| (s.last_sync_at, s.user_id))
            .collect();
        due.sort();
        Ok(due.into_iter().take(limit as usize).map(|(_, id)| id).collect())
    }

    async fn stats(&self, recent_limit: u32) -> PortalResult<WatchlistSyncStats> {
        let state = self.state.lock();
        let mut stats = WatchlistSyncStats::default();

        for settings in state.settings.values() {
            stats.users_with_sync_enabled += u64::from(settings.sync_enabled);
            stats.total_items_synced += settings.total_items_synced;
            stats.total_items_requested += settings.total_items_requested;
        }
        for row in state.history.values() {
            *stats.history_by_status.entry(row.status.to_string()).or_default() += 1;
        }

        let mut recent: Vec<_> = state.history.values().cloned().collect();
        recent.sort_by(|a, b| b.synced_at.cmp(&a.synced_at));
        recent.truncate(recent_limit as usize);
        stats.recent_history = recent;
        Ok(stats)
    }
}

/// Watchlist source that accepts every token and returns fixed items.
pub struct StaticWatchlistSource {
    items: Vec<WatchlistItem>,
}

impl StaticWatchlistSource {
    pub fn new(items: Vec<WatchlistItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl WatchlistSource for StaticWatchlistSource {
    async fn validate_token(&self, _token: &str) -> PortalResult<bool> {
        Ok(true)
    }

    async fn get_watchlist(&self, _token: &str) -> PortalResult<Vec<WatchlistItem>> {
        Ok(self.items.clone())
    }
}

/// Request service that creates every request and counts submissions.
#[derive(Default)]
pub struct CountingSubmitter {
    submitted: AtomicU32,
}

impl CountingSubmitter {
    pub fn submitted(&self) -> u32 {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestSubmitter for CountingSubmitter {
    async fn submit_request(
        &self,
        _service: &RequestServiceConfig,
        _request: &MediaRequest,
    ) -> PortalResult<SubmitOutcome> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(SubmitOutcome::Created { request_id: None })
    }
}
