//! Application state for Axum handlers.

use async_trait::async_trait;
use portal_core::PortalResult;
use portal_jobs::QueueAdmin;
use portal_repository::DatabasePool;
use portal_watchlist::{WatchlistJobs, WatchlistSyncService};
use std::sync::Arc;

/// Reachability probe of the database, used by `/health`.
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn ping(&self) -> PortalResult<()>;
}

#[async_trait]
impl DatabaseProbe for DatabasePool {
    async fn ping(&self) -> PortalResult<()> {
        self.health_check().await
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub watchlist: Arc<WatchlistSyncService>,
    pub database: Arc<dyn DatabaseProbe>,
    /// Queue triggers and admin controls. `None` without a queue backend.
    pub jobs: Option<WatchlistJobs>,
    pub queue_admin: Option<QueueAdmin>,
    /// Secret that makes the identity headers trusted.
    pub internal_token: Option<String>,
}

impl AppState {
    /// Creates state without a queue backend.
    pub fn new(
        watchlist: Arc<WatchlistSyncService>,
        database: Arc<dyn DatabaseProbe>,
        internal_token: Option<String>,
    ) -> Self {
        Self {
            watchlist,
            database,
            jobs: None,
            queue_admin: None,
            internal_token,
        }
    }

    /// Attaches the queue backend.
    #[must_use]
    pub fn with_queue(mut self, jobs: WatchlistJobs, queue_admin: QueueAdmin) -> Self {
        self.jobs = Some(jobs);
        self.queue_admin = Some(queue_admin);
        self
    }
}
