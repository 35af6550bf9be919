//! Queue controls and dashboard data for the admin surface.

use crate::error::JobResult;
use crate::job::{JobId, JobRecord};
use crate::queue::{JobFilter, JobQueue, QueueStats};
use crate::scheduler::SchedulerInfo;
use portal_core::PageRequest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Queue overview shown on the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    /// A worker heartbeat is live somewhere in the deployment.
    pub worker_running: bool,
    pub is_paused: bool,
    pub redis_connected: bool,
    pub stats: QueueStats,
    pub schedulers: Vec<SchedulerInfo>,
}

impl DashboardData {
    /// Dashboard for a missing or unreachable queue backend.
    #[must_use]
    pub fn disconnected() -> Self {
        Self::default()
    }
}

/// One page of jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobsPage {
    pub jobs: Vec<JobRecord>,
    pub page: usize,
    pub has_more: bool,
}

/// Thin admin operations over a [`JobQueue`].
#[derive(Clone)]
pub struct QueueAdmin {
    queue: Arc<dyn JobQueue>,
}

impl QueueAdmin {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// The underlying queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Dashboard data. An unreachable backend yields
    /// [`DashboardData::disconnected`] rather than an error.
    pub async fn dashboard(&self) -> DashboardData {
        if let Err(e) = self.queue.health_check().await {
            warn!(error = %e, "Queue backend unreachable");
            return DashboardData::disconnected();
        }

        match self.collect_dashboard().await {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Failed to load queue dashboard");
                DashboardData::disconnected()
            }
        }
    }

    async fn collect_dashboard(&self) -> JobResult<DashboardData> {
        let schedules = self.queue.list_schedules().await?;

        Ok(DashboardData {
            worker_running: self.queue.has_live_workers().await?,
            is_paused: self.queue.is_paused().await?,
            redis_connected: true,
            stats: self.queue.stats().await?,
            schedulers: schedules.iter().map(SchedulerInfo::from).collect(),
        })
    }

    /// Jobs newest first.
    pub async fn list_jobs(&self, filter: JobFilter, page: PageRequest) -> JobResult<JobsPage> {
        let paged = self.queue.list_jobs(filter, page).await?;
        Ok(JobsPage {
            jobs: paged.items,
            page: paged.page,
            has_more: paged.has_more,
        })
    }

    pub async fn retry(&self, job_id: &JobId) -> JobResult<()> {
        self.queue.retry(job_id).await
    }

    pub async fn remove(&self, job_id: &JobId) -> JobResult<()> {
        self.queue.remove(job_id).await
    }

    pub async fn pause(&self) -> JobResult<()> {
        self.queue.pause().await?;
        info!("Job queue paused by admin");
        Ok(())
    }

    pub async fn resume(&self) -> JobResult<()> {
        self.queue.resume().await?;
        info!("Job queue resumed by admin");
        Ok(())
    }
}
