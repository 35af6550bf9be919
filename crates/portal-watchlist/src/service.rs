//! Watchlist sync service.
//!
//! A single-user run goes through these steps:
//!
//! 1. Load the user, check the stored token and the active request service.
//!    Problems here are recorded on the user's settings, not thrown.
//! 2. Fetch the watchlist snapshot and the user's history.
//! 3. Submit every item that is not already in a terminal state.
//! 4. Persist history, removals and the additive settings update in one
//!    transaction.
//!
//! Runs for the same user never overlap: each holds the lease
//! `watchlist-sync:user:{id}` for its whole duration.

use crate::clients::{MediaRequest, RequestSubmitter, SubmitOutcome, WatchlistSource};
use crate::dto::{SyncAllResult, SyncResult, UpdateGlobalSyncSettingsRequest};
use crate::metrics::SyncMetrics;
use chrono::Utc;
use portal_config::WatchlistConfig;
use portal_core::{
    GlobalSyncConfig, HistoryStatus, LeaseStore, PortalError, PortalResult, SyncRunRecord, SyncStatus, UserId,
    ValidateExt, WatchlistItem, WatchlistSyncHistory, WatchlistSyncSettings, WatchlistSyncStats,
};
use portal_repository::{RequestServiceRepository, UserRepository, WatchlistSyncRepository};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Error reported while global sync is switched off.
pub const SYNC_DISABLED: &str = "Watchlist sync is disabled";
/// Error reported when a run for the same user is in flight.
pub const SYNC_IN_PROGRESS: &str = "sync already in progress";

const TOKEN_MISSING: &str = "No Plex token stored for this user";
const TOKEN_INVALID: &str = "Plex token is invalid or expired";
const NO_REQUEST_SERVICE: &str = "No active request service configured";

/// History rows returned with the admin stats.
const RECENT_HISTORY_LIMIT: u32 = 20;

/// Name of the per-user single-flight lease.
#[must_use]
pub fn user_lease_name(user_id: UserId) -> String {
    format!("watchlist-sync:user:{user_id}")
}

/// Collaborators of [`WatchlistSyncService`].
#[derive(Clone)]
pub struct SyncDependencies {
    pub users: Arc<dyn UserRepository>,
    pub sync_repo: Arc<dyn WatchlistSyncRepository>,
    pub request_services: Arc<dyn RequestServiceRepository>,
    pub source: Arc<dyn WatchlistSource>,
    pub submitter: Arc<dyn RequestSubmitter>,
    pub leases: Arc<dyn LeaseStore>,
}

/// Syncs external watchlists into downstream requests.
pub struct WatchlistSyncService {
    deps: SyncDependencies,
    config: WatchlistConfig,
}

/// Counters of one item loop.
#[derive(Debug, Default)]
struct RunTally {
    synced: u32,
    requested: u32,
    skipped: u32,
    failed: u32,
    errors: Vec<String>,
    rows: Vec<WatchlistSyncHistory>,
}

/// A held per-user lease. Dropping it while still held, as happens when a
/// job timeout cancels the run, releases the lease from a spawned task.
struct UserLease {
    leases: Arc<dyn LeaseStore>,
    name: String,
    holder: String,
    user_id: UserId,
    held: bool,
}

impl UserLease {
    async fn release(mut self) {
        self.held = false;
        release_lease(self.leases.as_ref(), &self.name, &self.holder, self.user_id).await;
    }
}

impl Drop for UserLease {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(user_id = %self.user_id, "No runtime to release cancelled watchlist sync lease");
            return;
        };

        debug!(user_id = %self.user_id, "Watchlist sync cancelled, releasing lease");
        let leases = self.leases.clone();
        let name = std::mem::take(&mut self.name);
        let holder = std::mem::take(&mut self.holder);
        let user_id = self.user_id;
        runtime.spawn(async move {
            release_lease(leases.as_ref(), &name, &holder, user_id).await;
        });
    }
}

async fn release_lease(leases: &dyn LeaseStore, name: &str, holder: &str, user_id: UserId) {
    if let Err(e) = leases.release(name, holder).await {
        warn!(user_id = %user_id, error = %e, "Failed to release watchlist sync lease");
    }
}

impl WatchlistSyncService {
    pub fn new(deps: SyncDependencies, config: WatchlistConfig) -> Self {
        Self { deps, config }
    }

    /// The persisted global settings.
    pub async fn global_config(&self) -> PortalResult<GlobalSyncConfig> {
        self.deps.sync_repo.get_global_config().await
    }

    /// Fails with [`SYNC_DISABLED`] while the global kill switch is off.
    pub async fn ensure_enabled(&self) -> PortalResult<GlobalSyncConfig> {
        let config = self.global_config().await?;
        if config.sync_enabled {
            Ok(config)
        } else {
            Err(PortalError::invalid_state(SYNC_DISABLED))
        }
    }

    /// Syncs one user now, outside the queue. Respects the global kill switch.
    pub async fn force_sync_user(&self, user_id: UserId) -> PortalResult<SyncResult> {
        self.ensure_enabled().await?;
        self.sync_user(user_id).await
    }

    /// Syncs one user under the per-user lease.
    ///
    /// Token and configuration problems come back as a failed
    /// [`SyncResult`]. Only infrastructure errors and an unreachable
    /// watchlist source are returned as `Err`.
    pub async fn sync_user(&self, user_id: UserId) -> PortalResult<SyncResult> {
        let lease = user_lease_name(user_id);
        let holder = Uuid::new_v4().to_string();

        if !self
            .deps
            .leases
            .try_acquire(&lease, &holder, self.config.user_lease_ttl())
            .await?
        {
            debug!(user_id = %user_id, "Watchlist sync already running for user");
            return Err(PortalError::invalid_state(SYNC_IN_PROGRESS));
        }

        let guard = UserLease {
            leases: self.deps.leases.clone(),
            name: lease,
            holder,
            user_id,
            held: true,
        };
        let result = self.run_sync(user_id).await;
        guard.release().await;
        result
    }

    async fn run_sync(&self, user_id: UserId) -> PortalResult<SyncResult> {
        let started = Instant::now();

        let user = self
            .deps
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| PortalError::not_found("User", user_id))?;

        let Some(token) = user.source_token() else {
            return self.record_failure(user_id, TOKEN_MISSING, started).await;
        };

        match self.deps.source.validate_token(token).await {
            Ok(true) => {}
            Ok(false) => return self.record_failure(user_id, TOKEN_INVALID, started).await,
            Err(e) => {
                self.record_failure(user_id, &e.to_string(), started).await?;
                return Err(e);
            }
        }

        let Some(service) = self.deps.request_services.find_active().await? else {
            return self.record_failure(user_id, NO_REQUEST_SERVICE, started).await;
        };

        let watchlist = match self.deps.source.get_watchlist(token).await {
            Ok(items) => items,
            Err(e) => {
                self.record_failure(user_id, &e.to_string(), started).await?;
                return Err(e);
            }
        };

        let history = self.deps.sync_repo.find_history(user_id).await?;
        let prior: HashMap<&str, HistoryStatus> = history
            .iter()
            .map(|row| (row.item_key.as_str(), row.status))
            .collect();

        debug!(
            user_id = %user_id,
            items = watchlist.len(),
            known = history.len(),
            service = %service.name,
            "Syncing watchlist"
        );

        let now = Utc::now();
        let mut tally = RunTally::default();

        for item in &watchlist {
            if prior.get(item.key.as_str()).is_some_and(HistoryStatus::is_terminal) {
                tally.skipped += 1;
                continue;
            }

            let Some(request) = MediaRequest::for_item(item) else {
                debug!(user_id = %user_id, title = %item.title, "No TMDB id, cannot request");
                tally.skipped += 1;
                tally
                    .rows
                    .push(WatchlistSyncHistory::for_item(user_id, item, HistoryStatus::Synced, now));
                continue;
            };

            let outcome = self.deps.submitter.submit_request(&service, &request).await;
            tally.record(user_id, item, outcome, now);
        }

        let current: HashSet<&str> = watchlist.iter().map(|item| item.key.as_str()).collect();
        let removed_keys: Vec<String> = history
            .iter()
            .filter(|row| row.status != HistoryStatus::RemovedFromWatchlist && !current.contains(row.item_key.as_str()))
            .map(|row| row.item_key.clone())
            .collect();

        let status = SyncStatus::classify(tally.synced, tally.failed);
        let stored_error = (!tally.errors.is_empty()).then(|| {
            tally
                .errors
                .iter()
                .take(self.config.max_stored_errors)
                .cloned()
                .collect::<Vec<_>>()
                .join("; ")
        });

        let run = SyncRunRecord {
            user_id,
            status,
            error: stored_error,
            items_synced: tally.synced,
            items_requested: tally.requested,
            finished_at: Utc::now(),
            history: tally.rows,
            removed_keys,
        };
        self.deps.sync_repo.record_run(&run).await?;

        SyncMetrics::run_finished(status, started.elapsed());
        SyncMetrics::items_skipped(tally.skipped);
        info!(
            user_id = %user_id,
            status = %status,
            synced = tally.synced,
            requested = tally.requested,
            skipped = tally.skipped,
            failed = tally.failed,
            removed = run.removed_keys.len(),
            "Watchlist sync finished"
        );

        let mut errors = tally.errors;
        errors.truncate(self.config.max_returned_errors);

        Ok(SyncResult {
            success: status != SyncStatus::Failed,
            items_synced: tally.synced,
            items_requested: tally.requested,
            items_skipped: tally.skipped,
            items_failed: tally.failed,
            errors: (!errors.is_empty()).then_some(errors),
            message: None,
        })
    }

    /// Records a run that failed before the item loop.
    async fn record_failure(&self, user_id: UserId, error: &str, started: Instant) -> PortalResult<SyncResult> {
        warn!(user_id = %user_id, error = %error, "Watchlist sync could not run");

        self.deps
            .sync_repo
            .record_run(&SyncRunRecord::failed(user_id, error, Utc::now()))
            .await?;
        SyncMetrics::run_finished(SyncStatus::Failed, started.elapsed());

        Ok(SyncResult::failed(error))
    }

    /// Syncs every due user, one after the other. A failing user does not
    /// stop the batch.
    pub async fn sync_all_due(&self) -> PortalResult<SyncAllResult> {
        let config = self.global_config().await?;
        if !config.sync_enabled {
            info!("Watchlist sync disabled, skipping due users");
            return Ok(SyncAllResult {
                message: Some(SYNC_DISABLED.to_string()),
                ..SyncAllResult::default()
            });
        }

        let due = self
            .deps
            .sync_repo
            .find_due_users(Utc::now(), config.interval(), self.config.batch_size)
            .await?;

        let mut summary = SyncAllResult {
            users_due: u32::try_from(due.len()).unwrap_or(u32::MAX),
            ..SyncAllResult::default()
        };
        info!(users = due.len(), "Syncing due watchlists");

        for (index, user_id) in due.into_iter().enumerate() {
            if index > 0 && !self.config.delay_between_users().is_zero() {
                tokio::time::sleep(self.config.delay_between_users()).await;
            }

            match self.sync_user(user_id).await {
                Ok(result) => {
                    summary.items_synced += result.items_synced;
                    summary.items_requested += result.items_requested;
                    if result.success {
                        summary.users_synced += 1;
                    } else {
                        summary.users_failed += 1;
                    }
                }
                Err(PortalError::InvalidState(reason)) if reason == SYNC_IN_PROGRESS => {
                    debug!(user_id = %user_id, "Watchlist sync already running, skipping user");
                    summary.users_skipped += 1;
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Watchlist sync failed for user");
                    summary.users_failed += 1;
                }
            }
        }

        info!(
            due = summary.users_due,
            synced = summary.users_synced,
            failed = summary.users_failed,
            skipped = summary.users_skipped,
            "Due watchlist sync finished"
        );
        Ok(summary)
    }

    /// Updates the global toggle and interval. Enabling requires an active
    /// request service.
    pub async fn update_global_settings(
        &self,
        request: UpdateGlobalSyncSettingsRequest,
    ) -> PortalResult<GlobalSyncConfig> {
        request.validate_request()?;

        if request.enabled && self.deps.request_services.find_active().await?.is_none() {
            return Err(PortalError::invalid_input(
                "Cannot enable watchlist sync without an active request service",
            ));
        }

        let saved = self.deps.sync_repo.save_global_config(request.into()).await?;
        info!(
            enabled = saved.sync_enabled,
            interval_minutes = saved.interval_minutes,
            "Updated global watchlist sync settings"
        );
        Ok(saved)
    }

    /// Sets a user's own opt-in flag.
    pub async fn set_user_sync_enabled(&self, user_id: UserId, enabled: bool) -> PortalResult<WatchlistSyncSettings> {
        if self.deps.users.find_by_id(user_id).await?.is_none() {
            return Err(PortalError::not_found("User", user_id));
        }
        self.deps.sync_repo.set_sync_enabled(user_id, enabled).await
    }

    /// Aggregate numbers and recent history for the admin overview.
    pub async fn stats(&self) -> PortalResult<WatchlistSyncStats> {
        self.deps.sync_repo.stats(RECENT_HISTORY_LIMIT).await
    }
}

impl RunTally {
    fn record(
        &mut self,
        user_id: UserId,
        item: &WatchlistItem,
        outcome: PortalResult<SubmitOutcome>,
        now: chrono::DateTime<Utc>,
    ) {
        let row = match outcome {
            Ok(SubmitOutcome::Created { request_id }) => {
                self.synced += 1;
                self.requested += 1;
                let mut row = WatchlistSyncHistory::for_item(user_id, item, HistoryStatus::Requested, now);
                row.request_id = request_id;
                row
            }
            Ok(SubmitOutcome::AlreadyRequested) => {
                self.synced += 1;
                WatchlistSyncHistory::for_item(user_id, item, HistoryStatus::AlreadyRequested, now)
            }
            Ok(SubmitOutcome::AlreadyAvailable) => {
                self.synced += 1;
                WatchlistSyncHistory::for_item(user_id, item, HistoryStatus::AlreadyAvailable, now)
            }
            Err(e) => {
                warn!(user_id = %user_id, title = %item.title, error = %e, "Request submission failed");
                self.failed += 1;
                self.errors.push(format!("{}: {e}", item.title));
                let mut row = WatchlistSyncHistory::for_item(user_id, item, HistoryStatus::Failed, now);
                row.error = Some(e.to_string());
                row
            }
        };

        SyncMetrics::item_processed(row.status);
        self.rows.push(row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MockRequestSubmitter, MockWatchlistSource};
    use crate::testing::{item, request_service, user, FakeRequestServices, FakeSyncRepository, FakeUsers};
    use portal_jobs::memory::InMemoryLeaseStore;
    use std::time::Duration;

    struct Harness {
        users: Arc<FakeUsers>,
        repo: Arc<FakeSyncRepository>,
        services: Arc<FakeRequestServices>,
        leases: Arc<InMemoryLeaseStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                users: Arc::new(FakeUsers::default()),
                repo: Arc::new(FakeSyncRepository::enabled()),
                services: Arc::new(FakeRequestServices::with(Some(request_service()))),
                leases: Arc::new(InMemoryLeaseStore::default()),
            }
        }

        fn service(&self, source: MockWatchlistSource, submitter: MockRequestSubmitter) -> WatchlistSyncService {
            let config = WatchlistConfig {
                delay_between_users_ms: 0,
                max_stored_errors: 2,
                max_returned_errors: 3,
                ..WatchlistConfig::default()
            };
            WatchlistSyncService::new(
                SyncDependencies {
                    users: self.users.clone(),
                    sync_repo: self.repo.clone(),
                    request_services: self.services.clone(),
                    source: Arc::new(source),
                    submitter: Arc::new(submitter),
                    leases: self.leases.clone(),
                },
                config,
            )
        }
    }

    fn source_with(items: Vec<WatchlistItem>) -> MockWatchlistSource {
        let mut source = MockWatchlistSource::new();
        source.expect_validate_token().returning(|_| Ok(true));
        source.expect_get_watchlist().returning(move |_| Ok(items.clone()));
        source
    }

    fn created() -> PortalResult<SubmitOutcome> {
        Ok(SubmitOutcome::Created {
            request_id: Some("r-1".to_string()),
        })
    }

    #[tokio::test]
    async fn test_second_run_submits_nothing() {
        let h = Harness::new();
        let user_id = h.users.insert(user(Some("token")));
        let items = vec![item("a", Some(1)), item("b", Some(2)), item("c", Some(3))];

        let mut submitter = MockRequestSubmitter::new();
        submitter.expect_submit_request().times(3).returning(|_, _| created());
        let service = h.service(source_with(items.clone()), submitter);

        let first = service.sync_user(user_id).await.unwrap();
        assert_eq!(first.items_requested, 3);
        assert_eq!(first.items_synced, 3);

        let second = service.sync_user(user_id).await.unwrap();
        assert!(second.success);
        assert_eq!(second.items_skipped, 3);
        assert_eq!(second.items_synced, 0);
        assert_eq!(h.repo.history(user_id).len(), 3);
    }

    #[tokio::test]
    async fn test_partial_failure_classification() {
        let h = Harness::new();
        let user_id = h.users.insert(user(Some("token")));
        let items = vec![item("a", Some(1)), item("b", Some(2)), item("c", Some(3))];

        let mut submitter = MockRequestSubmitter::new();
        submitter.expect_submit_request().returning(|_, request| {
            if request.media_id == 2 {
                Err(PortalError::upstream("Overseerr", "quota exceeded"))
            } else {
                created()
            }
        });
        let service = h.service(source_with(items), submitter);

        let result = service.sync_user(user_id).await.unwrap();
        assert!(result.success);
        assert_eq!(result.items_failed, 1);
        assert_eq!(result.items_synced, 2);
        assert_eq!(result.errors.as_ref().map(Vec::len), Some(1));

        let settings = h.repo.settings(user_id).unwrap();
        assert_eq!(settings.last_sync_status, Some(SyncStatus::Partial));
        assert!(settings.last_sync_error.unwrap().contains("quota exceeded"));

        let failed = h.repo.history(user_id).into_iter().find(|row| row.item_key == "b").unwrap();
        assert_eq!(failed.status, HistoryStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_item_is_retried_next_run() {
        let h = Harness::new();
        let user_id = h.users.insert(user(Some("token")));

        let mut submitter = MockRequestSubmitter::new();
        let mut seq = mockall::Sequence::new();
        submitter
            .expect_submit_request()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(PortalError::upstream("Overseerr", "timeout")));
        submitter
            .expect_submit_request()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(SubmitOutcome::AlreadyRequested));
        let service = h.service(source_with(vec![item("a", Some(1))]), submitter);

        let first = service.sync_user(user_id).await.unwrap();
        assert!(!first.success);
        assert_eq!(h.repo.settings(user_id).unwrap().last_sync_status, Some(SyncStatus::Failed));

        let second = service.sync_user(user_id).await.unwrap();
        assert!(second.success);
        assert_eq!(second.items_synced, 1);
        assert_eq!(second.items_requested, 0);
        assert_eq!(h.repo.history(user_id)[0].status, HistoryStatus::AlreadyRequested);
    }

    #[tokio::test]
    async fn test_missing_tmdb_id_is_skipped_not_failed() {
        let h = Harness::new();
        let user_id = h.users.insert(user(Some("token")));

        let mut submitter = MockRequestSubmitter::new();
        submitter.expect_submit_request().times(0);
        let service = h.service(source_with(vec![item("a", None)]), submitter);

        let result = service.sync_user(user_id).await.unwrap();
        assert!(result.success);
        assert_eq!(result.items_skipped, 1);
        assert_eq!(result.items_failed, 0);

        let rows = h.repo.history(user_id);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, HistoryStatus::Synced);
    }

    #[tokio::test]
    async fn test_totals_accumulate() {
        let h = Harness::new();
        let user_id = h.users.insert(user(Some("token")));

        let mut submitter = MockRequestSubmitter::new();
        submitter.expect_submit_request().returning(|_, _| created());
        let source = {
            let mut source = MockWatchlistSource::new();
            let mut calls: i64 = 0;
            source.expect_validate_token().returning(|_| Ok(true));
            source.expect_get_watchlist().returning(move |_| {
                calls += 1;
                Ok((0..calls).map(|i| item(&format!("k{i}"), Some(i))).collect())
            });
            source
        };
        let service = h.service(source, submitter);

        let mut expected = 0;
        for _ in 0..3 {
            let result = service.sync_user(user_id).await.unwrap();
            expected += u64::from(result.items_synced);
            assert_eq!(h.repo.settings(user_id).unwrap().total_items_synced, expected);
        }
        assert_eq!(expected, 3);
    }

    #[tokio::test]
    async fn test_empty_watchlist_is_success() {
        let h = Harness::new();
        let user_id = h.users.insert(user(Some("token")));
        let service = h.service(source_with(Vec::new()), MockRequestSubmitter::new());

        let result = service.sync_user(user_id).await.unwrap();
        assert_eq!(
            result,
            SyncResult {
                success: true,
                ..SyncResult::default()
            }
        );
        assert_eq!(h.repo.settings(user_id).unwrap().last_sync_status, Some(SyncStatus::Success));
    }

    #[tokio::test]
    async fn test_removed_items_are_marked() {
        let h = Harness::new();
        let user_id = h.users.insert(user(Some("token")));

        let mut submitter = MockRequestSubmitter::new();
        submitter.expect_submit_request().returning(|_, _| created());
        let source = {
            let mut source = MockWatchlistSource::new();
            let mut first = true;
            source.expect_validate_token().returning(|_| Ok(true));
            source.expect_get_watchlist().returning(move |_| {
                let items = if first {
                    vec![item("a", Some(1)), item("b", Some(2))]
                } else {
                    vec![item("a", Some(1))]
                };
                first = false;
                Ok(items)
            });
            source
        };
        let service = h.service(source, submitter);

        service.sync_user(user_id).await.unwrap();
        service.sync_user(user_id).await.unwrap();

        let removed = h.repo.history(user_id).into_iter().find(|row| row.item_key == "b").unwrap();
        assert_eq!(removed.status, HistoryStatus::RemovedFromWatchlist);
    }

    #[tokio::test]
    async fn test_missing_token_recorded_on_settings() {
        let h = Harness::new();
        let user_id = h.users.insert(user(None));
        let service = h.service(MockWatchlistSource::new(), MockRequestSubmitter::new());

        let result = service.sync_user(user_id).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.errors, Some(vec![TOKEN_MISSING.to_string()]));

        let settings = h.repo.settings(user_id).unwrap();
        assert_eq!(settings.last_sync_status, Some(SyncStatus::Failed));
        assert_eq!(settings.last_sync_error.as_deref(), Some(TOKEN_MISSING));
    }

    #[tokio::test]
    async fn test_invalid_token_and_missing_service() {
        let h = Harness::new();
        let user_id = h.users.insert(user(Some("stale")));

        let mut source = MockWatchlistSource::new();
        source.expect_validate_token().returning(|_| Ok(false));
        let service = h.service(source, MockRequestSubmitter::new());
        let result = service.sync_user(user_id).await.unwrap();
        assert_eq!(result.errors, Some(vec![TOKEN_INVALID.to_string()]));

        h.services.set(None);
        let mut source = MockWatchlistSource::new();
        source.expect_validate_token().returning(|_| Ok(true));
        let service = h.service(source, MockRequestSubmitter::new());
        let result = service.sync_user(user_id).await.unwrap();
        assert_eq!(result.errors, Some(vec![NO_REQUEST_SERVICE.to_string()]));
    }

    #[tokio::test]
    async fn test_unreachable_source_is_recorded_and_returned() {
        let h = Harness::new();
        let user_id = h.users.insert(user(Some("token")));

        let mut source = MockWatchlistSource::new();
        source.expect_validate_token().returning(|_| Ok(true));
        source
            .expect_get_watchlist()
            .returning(|_| Err(PortalError::upstream("Plex", "connection refused")));
        let service = h.service(source, MockRequestSubmitter::new());

        let err = service.sync_user(user_id).await.unwrap_err();
        assert_eq!(err.error_code(), "UPSTREAM_UNAVAILABLE");
        assert_eq!(h.repo.settings(user_id).unwrap().last_sync_status, Some(SyncStatus::Failed));
        assert!(h.leases.current(&user_lease_name(user_id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let h = Harness::new();
        let service = h.service(MockWatchlistSource::new(), MockRequestSubmitter::new());

        let err = service.sync_user(UserId::new()).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_concurrent_sync_for_same_user_rejected() {
        let h = Harness::new();
        let user_id = h.users.insert(user(Some("token")));
        h.leases
            .try_acquire(&user_lease_name(user_id), "other-run", Duration::from_secs(60))
            .await
            .unwrap();
        let service = h.service(MockWatchlistSource::new(), MockRequestSubmitter::new());

        let err = service.sync_user(user_id).await.unwrap_err();
        assert!(matches!(err, PortalError::InvalidState(ref m) if m == SYNC_IN_PROGRESS));
    }

    #[tokio::test]
    async fn test_force_sync_respects_kill_switch() {
        let h = Harness::new();
        let user_id = h.users.insert(user(Some("token")));
        h.repo.set_global(GlobalSyncConfig {
            sync_enabled: false,
            interval_minutes: 60,
        });
        h.repo.set_sync_enabled(user_id, true).await.unwrap();

        let mut submitter = MockRequestSubmitter::new();
        submitter.expect_submit_request().times(0);
        let service = h.service(MockWatchlistSource::new(), submitter);

        let err = service.force_sync_user(user_id).await.unwrap_err();
        assert!(err.to_string().contains(SYNC_DISABLED));
        assert!(h.repo.settings(user_id).unwrap().last_sync_at.is_none());
    }

    #[tokio::test]
    async fn test_sync_all_isolates_failures() {
        let h = Harness::new();
        let good = h.users.insert(user(Some("token")));
        let no_token = h.users.insert(user(None));
        for id in [good, no_token] {
            h.repo.set_sync_enabled(id, true).await.unwrap();
        }

        let mut submitter = MockRequestSubmitter::new();
        submitter.expect_submit_request().returning(|_, _| created());
        let service = h.service(source_with(vec![item("a", Some(1))]), submitter);

        let summary = service.sync_all_due().await.unwrap();
        assert_eq!(summary.users_due, 2);
        assert_eq!(summary.users_synced, 1);
        assert_eq!(summary.users_failed, 1);
        assert_eq!(summary.items_requested, 1);

        // Failed runs also count as a sync attempt.
        let again = service.sync_all_due().await.unwrap();
        assert_eq!(again.users_due, 0);
    }

    #[tokio::test]
    async fn test_sync_all_skips_only_running_users() {
        let h = Harness::new();
        let running = h.users.insert(user(Some("token")));
        let conflicted = h.users.insert(user(Some("token")));
        for id in [running, conflicted] {
            h.repo.set_sync_enabled(id, true).await.unwrap();
        }
        h.leases
            .try_acquire(&user_lease_name(running), "other-run", Duration::from_secs(60))
            .await
            .unwrap();
        h.repo.reject_runs("Duplicate entry for key 'uq_history'");

        let mut submitter = MockRequestSubmitter::new();
        submitter.expect_submit_request().returning(|_, _| created());
        let service = h.service(source_with(vec![item("a", Some(1))]), submitter);

        let summary = service.sync_all_due().await.unwrap();
        assert_eq!(summary.users_due, 2);
        assert_eq!(summary.users_skipped, 1);
        assert_eq!(summary.users_failed, 1);
        assert_eq!(summary.users_synced, 0);
    }

    #[tokio::test]
    async fn test_sync_all_disabled_does_nothing() {
        let h = Harness::new();
        h.repo.set_global(GlobalSyncConfig::default());
        let user_id = h.users.insert(user(Some("token")));
        h.repo.set_sync_enabled(user_id, true).await.unwrap();
        let service = h.service(MockWatchlistSource::new(), MockRequestSubmitter::new());

        let summary = service.sync_all_due().await.unwrap();
        assert_eq!(summary.users_due, 0);
        assert_eq!(summary.message.as_deref(), Some(SYNC_DISABLED));
    }

    #[tokio::test]
    async fn test_enable_requires_request_service() {
        let h = Harness::new();
        h.services.set(None);
        let service = h.service(MockWatchlistSource::new(), MockRequestSubmitter::new());

        let err = service
            .update_global_settings(UpdateGlobalSyncSettingsRequest {
                enabled: true,
                interval_minutes: 30,
            })
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");

        let saved = service
            .update_global_settings(UpdateGlobalSyncSettingsRequest {
                enabled: false,
                interval_minutes: 30,
            })
            .await
            .unwrap();
        assert_eq!(saved.interval_minutes, 30);
    }

    #[tokio::test]
    async fn test_interval_out_of_range_rejected() {
        let h = Harness::new();
        let service = h.service(MockWatchlistSource::new(), MockRequestSubmitter::new());

        let err = service
            .update_global_settings(UpdateGlobalSyncSettingsRequest {
                enabled: true,
                interval_minutes: 5,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_set_user_sync_enabled() {
        let h = Harness::new();
        let user_id = h.users.insert(user(Some("token")));
        let service = h.service(MockWatchlistSource::new(), MockRequestSubmitter::new());

        let settings = service.set_user_sync_enabled(user_id, true).await.unwrap();
        assert!(settings.sync_enabled);
        assert!(service.set_user_sync_enabled(UserId::new(), true).await.is_err());
    }
}
