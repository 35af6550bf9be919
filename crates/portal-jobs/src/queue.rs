//! Job queue abstraction.

use crate::error::JobResult;
use crate::job::{EnqueueOptions, JobId, JobPayload, JobRecord, JobStatus, JobType};
use crate::scheduler::{RecurringSchedule, ScheduleSpec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portal_core::{PageRequest, Paged};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Window for the completed count on the dashboard, in hours.
pub const COMPLETED_STATS_WINDOW_HOURS: i64 = 24;

/// Window for the failed count on the dashboard, in days.
pub const FAILED_STATS_WINDOW_DAYS: i64 = 7;

/// Job counts per status. Completed counts the last
/// [`COMPLETED_STATS_WINDOW_HOURS`], failed the last [`FAILED_STATS_WINDOW_DAYS`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Waiting plus prioritized.
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// Filter for [`JobQueue::list_jobs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
}

/// What happened to a job reported as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Moved to delayed; runs again at `run_at` as attempt `attempt`.
    Retrying { attempt: u32, run_at: DateTime<Utc> },
    /// No automatic attempt left. Stays failed until retried by hand.
    Failed,
}

/// Queue backend contract.
///
/// Every state transition is a single atomic operation on the backend so
/// that several processes can share one queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    // ============ Producers ============

    /// Enqueues a job. With a unique key that is already taken by an
    /// unfinished job, returns that job's id instead.
    async fn enqueue(&self, payload: JobPayload, options: EnqueueOptions) -> JobResult<JobId>;

    // ============ Consumers ============

    /// Claims the next eligible job of `job_type` for `worker_id`.
    /// Returns `None` while the queue is paused.
    async fn dequeue(&self, job_type: JobType, worker_id: &str) -> JobResult<Option<JobRecord>>;

    /// Marks an active job completed with the handler's return value.
    async fn complete(&self, job_id: &JobId, return_value: serde_json::Value) -> JobResult<()>;

    /// Records a failure and schedules an automatic retry if attempts remain.
    async fn fail(&self, job_id: &JobId, error: &str) -> JobResult<FailOutcome>;

    /// Refreshes a worker heartbeat.
    async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> JobResult<()>;

    /// Drops a worker heartbeat on clean shutdown.
    async fn clear_heartbeat(&self, worker_id: &str) -> JobResult<()>;

    /// True when at least one worker heartbeat is live.
    async fn has_live_workers(&self) -> JobResult<bool>;

    // ============ Queries ============

    /// Loads a job.
    async fn get_job(&self, job_id: &JobId) -> JobResult<Option<JobRecord>>;

    /// Counts per status.
    async fn stats(&self) -> JobResult<QueueStats>;

    /// Lists jobs newest first.
    async fn list_jobs(&self, filter: JobFilter, page: PageRequest) -> JobResult<Paged<JobRecord>>;

    // ============ Admin ============

    /// Moves a failed job back to waiting and increments its attempt count.
    /// `NotFound` when the job is missing or not failed.
    async fn retry(&self, job_id: &JobId) -> JobResult<()>;

    /// Deletes a job. `InvalidState` while active, `NotFound` when missing.
    async fn remove(&self, job_id: &JobId) -> JobResult<()>;

    /// Stops workers from claiming new jobs. Active jobs run to completion.
    async fn pause(&self) -> JobResult<()>;

    /// Lets workers claim jobs again.
    async fn resume(&self) -> JobResult<()>;

    async fn is_paused(&self) -> JobResult<bool>;

    // ============ Recurring schedules ============

    /// Inserts or replaces a schedule by id.
    async fn upsert_schedule(&self, spec: &ScheduleSpec, next_run_at: DateTime<Utc>) -> JobResult<()>;

    /// Deletes a schedule. Returns false when it did not exist.
    async fn remove_schedule(&self, id: &str) -> JobResult<bool>;

    async fn list_schedules(&self) -> JobResult<Vec<RecurringSchedule>>;

    /// Moves a schedule's next run from `expected` to `next`. Returns false
    /// when the schedule was removed or re-registered in between.
    async fn advance_schedule(&self, id: &str, expected: DateTime<Utc>, next: DateTime<Utc>) -> JobResult<bool>;

    // ============ Maintenance ============

    /// Moves delayed jobs whose time has come to waiting.
    async fn promote_delayed(&self) -> JobResult<u64>;

    /// Fails active jobs whose worker heartbeat lapsed.
    async fn recover_stalled(&self) -> JobResult<u64>;

    /// Deletes completed jobs finished before `completed_before` and failed
    /// jobs finished before `failed_before`.
    async fn clean(&self, completed_before: DateTime<Utc>, failed_before: DateTime<Utc>) -> JobResult<u64>;

    /// Checks that the backend answers.
    async fn health_check(&self) -> JobResult<()>;
}

/// Start of the completed and failed stats windows relative to `now`.
#[must_use]
pub fn stats_window_starts(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (
        now - chrono::Duration::hours(COMPLETED_STATS_WINDOW_HOURS),
        now - chrono::Duration::days(FAILED_STATS_WINDOW_DAYS),
    )
}

/// Error message recorded on jobs whose worker disappeared.
pub const STALLED_ERROR: &str = "job stalled";

/// Sorts newest first, filters by type and pages. Shared by backends that
/// load candidate records before paging.
#[must_use]
pub fn page_records(mut records: Vec<JobRecord>, filter: JobFilter, page: PageRequest) -> Paged<JobRecord> {
    if let Some(job_type) = filter.job_type {
        records.retain(|r| r.job_type == job_type);
    }
    if let Some(status) = filter.status {
        records.retain(|r| r.status == status);
    }
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.as_str().cmp(a.id.as_str())));
    Paged::from_ordered(records, page)
}
