//! Queue integration: job handlers, ad-hoc triggers and the recurring
//! sync-all schedule.

use crate::dto::SyncResult;
use crate::service::{WatchlistSyncService, SYNC_DISABLED, SYNC_IN_PROGRESS};
use async_trait::async_trait;
use portal_core::{GlobalSyncConfig, PortalError, PortalResult, UserId};
use portal_jobs::{
    EnqueueOptions, JobContext, JobError, JobHandler, JobHandlers, JobId, JobPayload, JobQueue, RecurringSchedule,
    SchedulePattern, ScheduleSpec, Scheduler,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stable id of the recurring sync-all schedule.
pub const SYNC_ALL_SCHEDULE_ID: &str = "watchlist-sync-all";

/// Unique key of manually triggered sync-all jobs.
const MANUAL_SYNC_ALL_KEY: &str = "watchlist-sync:all";

/// Queue unique key of a user's sync job.
#[must_use]
pub fn user_job_key(user_id: UserId) -> String {
    format!("watchlist-sync:user:{user_id}")
}

/// Handles `sync-one-user` jobs.
pub struct SyncUserWatchlistHandler {
    service: Arc<WatchlistSyncService>,
}

impl SyncUserWatchlistHandler {
    pub fn new(service: Arc<WatchlistSyncService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for SyncUserWatchlistHandler {
    async fn handle(&self, payload: &JobPayload, ctx: JobContext) -> Result<serde_json::Value, JobError> {
        let JobPayload::SyncUserWatchlist { user_id } = payload else {
            return Err(JobError::Handler(format!("unexpected payload for {}", ctx.job_type)));
        };

        // The toggle may have been switched off after the job was queued.
        if !self.service.global_config().await?.sync_enabled {
            info!(user_id = %user_id, "Watchlist sync disabled, skipping queued sync");
            return Ok(serde_json::to_value(SyncResult::skipped(SYNC_DISABLED))?);
        }

        let result = match self.service.sync_user(*user_id).await {
            Ok(result) => result,
            // A retried job may find the lease its own crashed run left behind;
            // fail so the backoff runs it again once the lease expires.
            Err(PortalError::InvalidState(reason)) if reason == SYNC_IN_PROGRESS && ctx.attempt > 1 => {
                warn!(user_id = %user_id, attempt = ctx.attempt, "Watchlist sync lease still held on retry");
                return Err(JobError::Handler(reason));
            }
            Err(PortalError::InvalidState(reason)) if reason == SYNC_IN_PROGRESS => {
                debug!(user_id = %user_id, attempt = ctx.attempt, "Coalesced with running sync");
                SyncResult::skipped(reason)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::to_value(result)?)
    }
}

/// Handles `sync-all-due-users` jobs.
pub struct SyncAllDueUsersHandler {
    service: Arc<WatchlistSyncService>,
}

impl SyncAllDueUsersHandler {
    pub fn new(service: Arc<WatchlistSyncService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl JobHandler for SyncAllDueUsersHandler {
    async fn handle(&self, _payload: &JobPayload, _ctx: JobContext) -> Result<serde_json::Value, JobError> {
        let summary = self.service.sync_all_due().await?;
        Ok(serde_json::to_value(summary)?)
    }
}

/// The handler table for the worker pool.
#[must_use]
pub fn job_handlers(service: Arc<WatchlistSyncService>) -> JobHandlers {
    JobHandlers {
        sync_user_watchlist: Arc::new(SyncUserWatchlistHandler::new(service.clone())),
        sync_all_due_users: Arc::new(SyncAllDueUsersHandler::new(service)),
    }
}

/// Admin-facing queue operations of the watchlist feature.
#[derive(Clone)]
pub struct WatchlistJobs {
    queue: Arc<dyn JobQueue>,
    scheduler: Arc<Scheduler>,
    service: Arc<WatchlistSyncService>,
}

impl WatchlistJobs {
    pub fn new(queue: Arc<dyn JobQueue>, scheduler: Arc<Scheduler>, service: Arc<WatchlistSyncService>) -> Self {
        Self {
            queue,
            scheduler,
            service,
        }
    }

    /// Queues a sync for one user, or for all due users without a user id.
    /// Refused while global sync is disabled.
    pub async fn trigger(&self, user_id: Option<UserId>) -> PortalResult<JobId> {
        self.service.ensure_enabled().await?;

        let (payload, options) = match user_id {
            Some(user_id) => (
                JobPayload::SyncUserWatchlist { user_id },
                EnqueueOptions::default().unique(user_job_key(user_id)),
            ),
            None => (
                JobPayload::SyncAllDueUsers,
                EnqueueOptions::default().unique(MANUAL_SYNC_ALL_KEY),
            ),
        };

        let job_id = self.queue.enqueue(payload, options).await?;
        info!(job_id = %job_id, user_id = ?user_id, "Triggered watchlist sync job");
        Ok(job_id)
    }

    /// Brings the recurring sync-all schedule in line with `config`:
    /// registered at the configured interval while enabled, removed while
    /// disabled. An unchanged schedule keeps its next run time.
    pub async fn apply_schedule(&self, config: &GlobalSyncConfig) -> PortalResult<Option<RecurringSchedule>> {
        if !config.sync_enabled {
            self.scheduler.unschedule(SYNC_ALL_SCHEDULE_ID).await?;
            return Ok(None);
        }

        let pattern = SchedulePattern::every_minutes(config.interval_minutes);
        let existing = self
            .queue
            .list_schedules()
            .await?
            .into_iter()
            .find(|s| s.spec.id == SYNC_ALL_SCHEDULE_ID && s.spec.pattern == pattern);
        if existing.is_some() {
            return Ok(existing);
        }

        let schedule = self
            .scheduler
            .schedule_recurring(ScheduleSpec {
                id: SYNC_ALL_SCHEDULE_ID.to_string(),
                payload: JobPayload::SyncAllDueUsers,
                pattern,
            })
            .await?;
        Ok(Some(schedule))
    }

    /// Applies the persisted global settings. Run when an instance becomes
    /// the active one.
    pub async fn register_schedule(&self) -> PortalResult<Option<RecurringSchedule>> {
        let config = self.service.global_config().await?;
        self.apply_schedule(&config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{MockRequestSubmitter, MockWatchlistSource, SubmitOutcome};
    use crate::service::{user_lease_name, SyncDependencies};
    use crate::clients::WatchlistSource;
    use crate::testing::{
        item, request_service, user, CountingSubmitter, FakeRequestServices, FakeSyncRepository, FakeUsers,
    };
    use portal_core::WatchlistItem;
    use portal_config::WatchlistConfig;
    use portal_core::LeaseStore;
    use portal_jobs::memory::{InMemoryJobQueue, InMemoryLeaseStore};
    use portal_jobs::{BackoffPolicy, JobStatus, JobType, WorkerPool, WorkerPoolConfig};
    use portal_repository::WatchlistSyncRepository;
    use std::time::Duration;

    struct Fixture {
        queue: Arc<InMemoryJobQueue>,
        repo: Arc<FakeSyncRepository>,
        users: Arc<FakeUsers>,
        leases: Arc<InMemoryLeaseStore>,
        service: Arc<WatchlistSyncService>,
        jobs: WatchlistJobs,
    }

    fn fixture() -> Fixture {
        let queue = Arc::new(InMemoryJobQueue::default());
        let repo = Arc::new(FakeSyncRepository::enabled());
        let users = Arc::new(FakeUsers::default());
        let leases = Arc::new(InMemoryLeaseStore::default());

        let mut source = MockWatchlistSource::new();
        source.expect_validate_token().returning(|_| Ok(true));
        source
            .expect_get_watchlist()
            .returning(|_| Ok(vec![item("a", Some(1)), item("b", Some(2))]));
        let mut submitter = MockRequestSubmitter::new();
        submitter
            .expect_submit_request()
            .returning(|_, _| Ok(SubmitOutcome::Created { request_id: None }));

        let service = Arc::new(WatchlistSyncService::new(
            SyncDependencies {
                users: users.clone(),
                sync_repo: repo.clone(),
                request_services: Arc::new(FakeRequestServices::with(Some(request_service()))),
                source: Arc::new(source),
                submitter: Arc::new(submitter),
                leases: leases.clone(),
            },
            WatchlistConfig {
                delay_between_users_ms: 0,
                ..WatchlistConfig::default()
            },
        ));
        let scheduler = Arc::new(Scheduler::new(queue.clone(), Duration::from_secs(5)));
        let jobs = WatchlistJobs::new(queue.clone(), scheduler, service.clone());

        Fixture {
            queue,
            repo,
            users,
            leases,
            service,
            jobs,
        }
    }

    fn ctx(job_type: JobType) -> JobContext {
        JobContext {
            job_id: JobId::new(),
            job_type,
            attempt: 1,
            max_attempts: 3,
            worker_id: "worker-test".to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_trigger_deduplicates_per_user() {
        let f = fixture();
        let user_id = UserId::new();

        let a = f.jobs.trigger(Some(user_id)).await.unwrap();
        let b = f.jobs.trigger(Some(user_id)).await.unwrap();
        let other = f.jobs.trigger(Some(UserId::new())).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, other);
        assert_eq!(f.queue.stats().await.unwrap().waiting, 2);
    }

    #[tokio::test]
    async fn test_trigger_refused_when_disabled() {
        let f = fixture();
        f.repo.set_global(GlobalSyncConfig::default());

        let err = f.jobs.trigger(None).await.unwrap_err();
        assert!(err.to_string().contains(SYNC_DISABLED));
        assert_eq!(f.queue.stats().await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn test_apply_schedule_upserts_and_removes() {
        let f = fixture();
        let config = |sync_enabled, interval_minutes| GlobalSyncConfig {
            sync_enabled,
            interval_minutes,
        };

        let first = f.jobs.apply_schedule(&config(true, 60)).await.unwrap().unwrap();
        let same = f.jobs.apply_schedule(&config(true, 60)).await.unwrap().unwrap();
        assert_eq!(first.next_run_at, same.next_run_at);

        let changed = f.jobs.apply_schedule(&config(true, 30)).await.unwrap().unwrap();
        assert_eq!(changed.spec.pattern, SchedulePattern::every_minutes(30));
        assert_eq!(f.queue.list_schedules().await.unwrap().len(), 1);

        assert!(f.jobs.apply_schedule(&config(false, 30)).await.unwrap().is_none());
        assert!(f.queue.list_schedules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_schedule_reads_settings() {
        let f = fixture();
        f.repo
            .save_global_config(GlobalSyncConfig {
                sync_enabled: true,
                interval_minutes: 45,
            })
            .await
            .unwrap();

        let schedule = f.jobs.register_schedule().await.unwrap().unwrap();
        assert_eq!(schedule.spec.pattern, SchedulePattern::every_minutes(45));
    }

    #[tokio::test]
    async fn test_user_handler_runs_sync() {
        let f = fixture();
        let user_id = f.users.insert(user(Some("token")));
        let handler = SyncUserWatchlistHandler::new(f.service.clone());

        let value = handler
            .handle(&JobPayload::SyncUserWatchlist { user_id }, ctx(JobType::SyncUserWatchlist))
            .await
            .unwrap();

        assert_eq!(value["success"], true);
        assert_eq!(value["itemsRequested"], 2);
    }

    #[tokio::test]
    async fn test_user_handler_skips_when_disabled_or_running() {
        let f = fixture();
        let user_id = f.users.insert(user(Some("token")));
        let handler = SyncUserWatchlistHandler::new(f.service.clone());
        let payload = JobPayload::SyncUserWatchlist { user_id };

        f.leases
            .try_acquire(&user_lease_name(user_id), "elsewhere", Duration::from_secs(60))
            .await
            .unwrap();
        let value = handler.handle(&payload, ctx(JobType::SyncUserWatchlist)).await.unwrap();
        assert_eq!(value["itemsSynced"], 0);
        assert!(value["message"].as_str().is_some());

        f.repo.set_global(GlobalSyncConfig::default());
        let value = handler.handle(&payload, ctx(JobType::SyncUserWatchlist)).await.unwrap();
        assert_eq!(value["message"], SYNC_DISABLED);
    }

    #[tokio::test]
    async fn test_retried_job_does_not_complete_while_lease_held() {
        let f = fixture();
        let user_id = f.users.insert(user(Some("token")));
        f.leases
            .try_acquire(&user_lease_name(user_id), "crashed-worker", Duration::from_secs(600))
            .await
            .unwrap();

        let job_id = f
            .queue
            .enqueue(
                JobPayload::SyncUserWatchlist { user_id },
                EnqueueOptions::default().backoff(BackoffPolicy::fixed(Duration::ZERO)),
            )
            .await
            .unwrap();
        // Taken by a worker that died without a heartbeat.
        f.queue.dequeue(JobType::SyncUserWatchlist, "worker-gone").await.unwrap().unwrap();
        assert_eq!(f.queue.recover_stalled().await.unwrap(), 1);
        assert_eq!(f.queue.promote_delayed().await.unwrap(), 1);

        let pool = WorkerPool::new(
            f.queue.clone(),
            job_handlers(f.service.clone()),
            WorkerPoolConfig::default(),
        );
        assert!(pool.process_next(JobType::SyncUserWatchlist).await.unwrap());

        let job = f.queue.get_job(&job_id).await.unwrap().unwrap();
        assert_ne!(job.status, JobStatus::Completed);
        assert_eq!(job.last_error.as_deref(), Some(SYNC_IN_PROGRESS));
        assert!(f.repo.settings(user_id).is_none());
    }

    #[tokio::test]
    async fn test_retry_attempt_fails_handler_while_lease_held() {
        let f = fixture();
        let user_id = f.users.insert(user(Some("token")));
        let handler = SyncUserWatchlistHandler::new(f.service.clone());
        f.leases
            .try_acquire(&user_lease_name(user_id), "crashed-worker", Duration::from_secs(600))
            .await
            .unwrap();

        let mut retry = ctx(JobType::SyncUserWatchlist);
        retry.attempt = 2;
        let err = handler
            .handle(&JobPayload::SyncUserWatchlist { user_id }, retry)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_user_handler_fails_on_storage_conflict() {
        let f = fixture();
        let user_id = f.users.insert(user(Some("token")));
        f.repo.reject_runs("Duplicate entry for key 'uq_history'");
        let handler = SyncUserWatchlistHandler::new(f.service.clone());

        let err = handler
            .handle(&JobPayload::SyncUserWatchlist { user_id }, ctx(JobType::SyncUserWatchlist))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidState(ref m) if m.contains("Duplicate entry")));
    }

    #[tokio::test]
    async fn test_user_handler_unknown_user_fails_job() {
        let f = fixture();
        let handler = SyncUserWatchlistHandler::new(f.service.clone());

        let err = handler
            .handle(
                &JobPayload::SyncUserWatchlist { user_id: UserId::new() },
                ctx(JobType::SyncUserWatchlist),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_worker_processes_queued_sync() {
        let f = fixture();
        let user_id = f.users.insert(user(Some("token")));
        f.repo.set_sync_enabled(user_id, true).await.unwrap();

        let job_id = f.jobs.trigger(None).await.unwrap();
        let pool = WorkerPool::new(
            f.queue.clone(),
            job_handlers(f.service.clone()),
            WorkerPoolConfig::default(),
        );

        assert!(pool.process_next(JobType::SyncAllDueUsers).await.unwrap());

        let job = f.queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let summary = job.return_value.unwrap();
        assert_eq!(summary["usersSynced"], 1);
        assert_eq!(summary["itemsRequested"], 2);
        assert_eq!(f.repo.settings(user_id).unwrap().total_items_requested, 2);
    }

    /// Source whose watchlist fetch outlasts the job timeout.
    struct SlowSource(Duration);

    #[async_trait]
    impl WatchlistSource for SlowSource {
        async fn validate_token(&self, _token: &str) -> PortalResult<bool> {
            Ok(true)
        }

        async fn get_watchlist(&self, _token: &str) -> PortalResult<Vec<WatchlistItem>> {
            tokio::time::sleep(self.0).await;
            Ok(vec![item("a", Some(1))])
        }
    }

    #[tokio::test]
    async fn test_timed_out_sync_releases_user_lease() {
        let queue = Arc::new(InMemoryJobQueue::default());
        let users = Arc::new(FakeUsers::default());
        let leases = Arc::new(InMemoryLeaseStore::default());
        let service = Arc::new(WatchlistSyncService::new(
            SyncDependencies {
                users: users.clone(),
                sync_repo: Arc::new(FakeSyncRepository::enabled()),
                request_services: Arc::new(FakeRequestServices::with(Some(request_service()))),
                source: Arc::new(SlowSource(Duration::from_millis(400))),
                submitter: Arc::new(CountingSubmitter::default()),
                leases: leases.clone(),
            },
            WatchlistConfig::default(),
        ));
        let scheduler = Arc::new(Scheduler::new(queue.clone(), Duration::from_secs(5)));
        let jobs = WatchlistJobs::new(queue.clone(), scheduler, service.clone());
        let user_id = users.insert(user(Some("token")));

        let job_id = jobs.trigger(Some(user_id)).await.unwrap();
        let pool = WorkerPool::new(
            queue.clone(),
            job_handlers(service.clone()),
            WorkerPoolConfig {
                job_timeout: Duration::from_millis(100),
                ..WorkerPoolConfig::default()
            },
        );
        assert!(pool.process_next(JobType::SyncUserWatchlist).await.unwrap());

        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Delayed);
        assert_eq!(job.last_error.as_deref(), Some("Job timed out after 100ms"));

        let lease = user_lease_name(user_id);
        for _ in 0..50 {
            if leases.current(&lease).await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(leases.current(&lease).await.unwrap().is_none());

        let result = service.force_sync_user(user_id).await.unwrap();
        assert!(result.success);
        assert_eq!(result.items_requested, 1);
    }
}
