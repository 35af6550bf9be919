//! Component wiring.
//!
//! Builds every component from the loaded configuration by explicit
//! constructor injection. The queue backend is optional: without a
//! reachable Redis the portal serves HTTP actions only and background
//! processing stays off.

use crate::supervisor::BackgroundSupervisor;
use portal_config::{AppConfig, LockBackend};
use portal_core::{LeaseStore, PortalResult};
use portal_jobs::{JobQueue, LeaderElector, QueueAdmin, RedisJobQueue, RedisLeaseStore, Scheduler, WorkerPool, WorkerPoolConfig};
use portal_repository::{
    create_pool, DatabasePool, MySqlLeaseStore, MySqlRequestServiceRepository, MySqlUserRepository,
    MySqlWatchlistSyncRepository,
};
use portal_rest::AppState;
use portal_watchlist::{job_handlers, OverseerrClient, PlexWatchlistClient, SyncDependencies, WatchlistJobs, WatchlistSyncService};
use std::sync::Arc;
use tracing::{info, warn};

/// Fully wired application.
pub struct AppModule {
    pub state: AppState,
    pub db_pool: Arc<DatabasePool>,
    /// Leader-gated worker and scheduler. `None` without a queue backend.
    pub background: Option<BackgroundSupervisor>,
}

/// Lease backend actually used, given whether Redis is reachable.
#[must_use]
pub fn effective_lock_backend(requested: LockBackend, redis_available: bool) -> LockBackend {
    match requested {
        LockBackend::Redis if !redis_available => {
            warn!("Redis lock backend requested but Redis is unavailable, using the database");
            LockBackend::Database
        }
        backend => backend,
    }
}

/// Builds the application from configuration.
pub async fn build_app_module(config: &AppConfig) -> PortalResult<AppModule> {
    let db_pool = create_pool(&config.database).await?;
    if config.database.run_migrations {
        db_pool.run_migrations().await?;
    }

    let redis_pool = match config.redis.url {
        Some(_) => match portal_jobs::create_pool(&config.redis).await {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, background processing disabled");
                None
            }
        },
        None => {
            info!("No Redis URL configured, background processing disabled");
            None
        }
    };

    let leases: Arc<dyn LeaseStore> = match (effective_lock_backend(config.lock.backend, redis_pool.is_some()), &redis_pool) {
        (LockBackend::Redis, Some(pool)) => Arc::new(RedisLeaseStore::new(pool.clone(), config.jobs.key_prefix.clone())),
        _ => Arc::new(MySqlLeaseStore::new(db_pool.clone())),
    };

    let service = Arc::new(WatchlistSyncService::new(
        SyncDependencies {
            users: Arc::new(MySqlUserRepository::new(db_pool.clone())),
            sync_repo: Arc::new(MySqlWatchlistSyncRepository::new(db_pool.clone())),
            request_services: Arc::new(MySqlRequestServiceRepository::new(db_pool.clone())),
            source: Arc::new(PlexWatchlistClient::new(&config.watchlist)?),
            submitter: Arc::new(OverseerrClient::new(&config.watchlist)?),
            leases: leases.clone(),
        },
        config.watchlist.clone(),
    ));

    let mut state = AppState::new(
        service.clone(),
        db_pool.clone(),
        config.server.internal_api_token.clone(),
    );

    let background = match redis_pool {
        Some(pool) => {
            let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::from_config(pool, &config.jobs));
            let scheduler = Arc::new(Scheduler::new(queue.clone(), config.jobs.scheduler_tick()));
            let jobs = WatchlistJobs::new(queue.clone(), scheduler.clone(), service.clone());
            state = state.with_queue(jobs.clone(), QueueAdmin::new(queue.clone()));

            let pool = WorkerPool::new(queue, job_handlers(service), WorkerPoolConfig::from(&config.jobs));
            let elector = Arc::new(LeaderElector::new(leases, &config.lock));
            Some(BackgroundSupervisor::new(elector, pool, scheduler, jobs))
        }
        None => None,
    };

    Ok(AppModule {
        state,
        db_pool,
        background,
    })
}
