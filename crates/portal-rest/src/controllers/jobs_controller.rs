//! Job queue admin actions.

use crate::extractors::AdminActor;
use crate::responses::{action, done, ActionResponse};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use portal_core::{PageRequest, PortalError, PortalResult};
use portal_jobs::{DashboardData, JobFilter, JobId, JobStatus, JobType, JobsPage, QueueAdmin};
use portal_watchlist::TriggerSyncRequest;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Create the jobs router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/dashboard", get(dashboard))
        .route("/jobs/pause", post(pause_queue))
        .route("/jobs/resume", post(resume_queue))
        .route("/jobs/watchlist-sync", post(trigger_watchlist_sync))
        .route("/jobs/:job_id", delete(remove_job))
        .route("/jobs/:job_id/retry", post(retry_job))
}

/// Query parameters of the job list.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListQuery {
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl JobListQuery {
    fn filter(&self) -> PortalResult<JobFilter> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<JobStatus>)
            .transpose()
            .map_err(PortalError::invalid_input)?;
        let job_type = self
            .job_type
            .as_deref()
            .map(str::parse::<JobType>)
            .transpose()
            .map_err(PortalError::invalid_input)?;
        Ok(JobFilter { status, job_type })
    }

    fn page(&self) -> PageRequest {
        PageRequest::new(
            self.page.unwrap_or(1),
            self.limit.unwrap_or(PageRequest::DEFAULT_LIMIT),
        )
    }
}

/// Id of a queued job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredJob {
    pub job_id: JobId,
}

fn queue_unavailable() -> PortalError {
    PortalError::Queue("Job queue not configured. Redis may not be enabled.".to_string())
}

/// Queue overview. Without a queue backend the dashboard reports it as
/// disconnected.
async fn dashboard(State(state): State<AppState>, _admin: AdminActor) -> ActionResponse<DashboardData> {
    match &state.queue_admin {
        Some(admin) => ActionResponse::ok(admin.dashboard().await),
        None => ActionResponse::ok(DashboardData::disconnected()),
    }
}

async fn list_jobs(
    State(state): State<AppState>,
    _admin: AdminActor,
    Query(query): Query<JobListQuery>,
) -> ActionResponse<JobsPage> {
    action(load_jobs(state.queue_admin.as_ref(), &query).await)
}

async fn load_jobs(admin: Option<&QueueAdmin>, query: &JobListQuery) -> PortalResult<JobsPage> {
    let admin = admin.ok_or_else(queue_unavailable)?;
    Ok(admin.list_jobs(query.filter()?, query.page()).await?)
}

async fn retry_job(
    State(state): State<AppState>,
    AdminActor(actor): AdminActor,
    Path(job_id): Path<String>,
) -> ActionResponse<()> {
    let Some(admin) = &state.queue_admin else {
        return ActionResponse::error(&queue_unavailable());
    };
    let job_id = JobId::from(job_id);
    match admin.retry(&job_id).await {
        Ok(()) => {
            info!(job_id = %job_id, admin = %actor.user_id, "Job retried by admin");
            done()
        }
        Err(e) => ActionResponse::error(&e.into()),
    }
}

async fn remove_job(
    State(state): State<AppState>,
    AdminActor(actor): AdminActor,
    Path(job_id): Path<String>,
) -> ActionResponse<()> {
    let Some(admin) = &state.queue_admin else {
        return ActionResponse::error(&queue_unavailable());
    };
    let job_id = JobId::from(job_id);
    match admin.remove(&job_id).await {
        Ok(()) => {
            info!(job_id = %job_id, admin = %actor.user_id, "Job removed by admin");
            done()
        }
        Err(e) => ActionResponse::error(&e.into()),
    }
}

async fn pause_queue(State(state): State<AppState>, _admin: AdminActor) -> ActionResponse<()> {
    match &state.queue_admin {
        Some(admin) => action(admin.pause().await.map_err(PortalError::from)),
        None => ActionResponse::error(&queue_unavailable()),
    }
}

async fn resume_queue(State(state): State<AppState>, _admin: AdminActor) -> ActionResponse<()> {
    match &state.queue_admin {
        Some(admin) => action(admin.resume().await.map_err(PortalError::from)),
        None => ActionResponse::error(&queue_unavailable()),
    }
}

/// Queues a sync for one user, or for all due users without a user id.
async fn trigger_watchlist_sync(
    State(state): State<AppState>,
    _admin: AdminActor,
    request: Option<Json<TriggerSyncRequest>>,
) -> ActionResponse<TriggeredJob> {
    let Some(jobs) = &state.jobs else {
        return ActionResponse::error(&queue_unavailable());
    };
    let user_id = request.and_then(|Json(r)| r.user_id);
    action(jobs.trigger(user_id).await.map(|job_id| TriggeredJob { job_id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parses_filter() {
        let query = JobListQuery {
            status: Some("failed".to_string()),
            job_type: Some("sync-one-user".to_string()),
            ..JobListQuery::default()
        };
        let filter = query.filter().unwrap();
        assert_eq!(filter.status, Some(JobStatus::Failed));
        assert_eq!(filter.job_type, Some(JobType::SyncUserWatchlist));
    }

    #[test]
    fn test_query_rejects_unknown_status() {
        let query = JobListQuery {
            status: Some("exploded".to_string()),
            ..JobListQuery::default()
        };
        let err = query.filter().unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_query_page_defaults() {
        let page = JobListQuery::default().page();
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, PageRequest::DEFAULT_LIMIT);
    }
}
