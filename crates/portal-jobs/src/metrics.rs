//! Prometheus metrics for the job queue, scheduler and leader election.

use crate::job::JobType;
use crate::queue::QueueStats;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names.
pub mod names {
    /// Total jobs enqueued.
    pub const JOBS_ENQUEUED_TOTAL: &str = "portal_jobs_enqueued_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "portal_jobs_completed_total";
    /// Total job executions that failed.
    pub const JOBS_FAILED_TOTAL: &str = "portal_jobs_failed_total";
    /// Total automatic retries scheduled.
    pub const JOBS_RETRIED_TOTAL: &str = "portal_jobs_retried_total";
    /// Total jobs timed out.
    pub const JOBS_TIMED_OUT_TOTAL: &str = "portal_jobs_timed_out_total";
    /// Total stalled jobs recovered by the maintenance sweep.
    pub const JOBS_STALLED_TOTAL: &str = "portal_jobs_stalled_total";

    /// Current waiting jobs.
    pub const JOBS_WAITING: &str = "portal_jobs_waiting";
    /// Current active jobs.
    pub const JOBS_ACTIVE: &str = "portal_jobs_active";
    /// Current delayed jobs.
    pub const JOBS_DELAYED: &str = "portal_jobs_delayed";

    /// Job execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "portal_job_duration_seconds";

    /// Recurring schedules fired.
    pub const SCHEDULER_JOBS_TRIGGERED: &str = "portal_scheduler_jobs_triggered_total";

    /// Whether this instance holds the background lock.
    pub const LOCK_IS_LEADER: &str = "portal_lock_is_leader";
    /// Total lock acquisitions by this instance.
    pub const LOCK_ACQUIRED_TOTAL: &str = "portal_lock_acquired_total";
    /// Total times this instance lost the lock while holding it.
    pub const LOCK_LOST_TOTAL: &str = "portal_lock_lost_total";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(names::JOBS_COMPLETED_TOTAL, "Total number of jobs completed successfully");
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total number of failed job executions");
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total number of automatic job retries");
    describe_counter!(names::JOBS_TIMED_OUT_TOTAL, "Total number of jobs that timed out");
    describe_counter!(names::JOBS_STALLED_TOTAL, "Total number of stalled jobs recovered");

    describe_gauge!(names::JOBS_WAITING, "Current number of waiting jobs");
    describe_gauge!(names::JOBS_ACTIVE, "Current number of active jobs");
    describe_gauge!(names::JOBS_DELAYED, "Current number of delayed jobs");

    describe_histogram!(names::JOB_DURATION_SECONDS, "Job execution duration in seconds");

    describe_counter!(
        names::SCHEDULER_JOBS_TRIGGERED,
        "Total number of recurring schedule firings"
    );

    describe_gauge!(
        names::LOCK_IS_LEADER,
        "Whether this instance holds the background lock (1) or not (0)"
    );
    describe_counter!(names::LOCK_ACQUIRED_TOTAL, "Total number of lock acquisitions");
    describe_counter!(names::LOCK_LOST_TOTAL, "Total number of lock losses");
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    pub fn job_enqueued(job_type: JobType) {
        counter!(names::JOBS_ENQUEUED_TOTAL, "job_type" => job_type.as_str()).increment(1);
    }

    pub fn job_completed(job_type: JobType, duration: Duration) {
        counter!(names::JOBS_COMPLETED_TOTAL, "job_type" => job_type.as_str()).increment(1);
        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_type" => job_type.as_str(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_failed(job_type: JobType, duration: Duration) {
        counter!(names::JOBS_FAILED_TOTAL, "job_type" => job_type.as_str()).increment(1);
        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_type" => job_type.as_str(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_retried(job_type: JobType, attempt: u32) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "job_type" => job_type.as_str(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
    }

    pub fn job_timed_out(job_type: JobType) {
        counter!(names::JOBS_TIMED_OUT_TOTAL, "job_type" => job_type.as_str()).increment(1);
    }

    pub fn jobs_stalled(count: u64) {
        counter!(names::JOBS_STALLED_TOTAL).increment(count);
    }

    /// Update queue size gauges.
    #[allow(clippy::cast_precision_loss)]
    pub fn update_queue_sizes(stats: &QueueStats) {
        gauge!(names::JOBS_WAITING).set(stats.waiting as f64);
        gauge!(names::JOBS_ACTIVE).set(stats.active as f64);
        gauge!(names::JOBS_DELAYED).set(stats.delayed as f64);
    }
}

/// Scheduler metrics recorder.
#[derive(Clone)]
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    pub fn job_triggered(schedule_id: &str, job_type: JobType) {
        counter!(
            names::SCHEDULER_JOBS_TRIGGERED,
            "schedule_id" => schedule_id.to_string(),
            "job_type" => job_type.as_str()
        )
        .increment(1);
    }
}

/// Leader election metrics recorder.
#[derive(Clone)]
pub struct LockMetrics;

impl LockMetrics {
    pub fn update_leader_status(lock_name: &str, is_leader: bool) {
        gauge!(names::LOCK_IS_LEADER, "lock" => lock_name.to_string()).set(if is_leader { 1.0 } else { 0.0 });
    }

    pub fn lock_acquired(lock_name: &str) {
        counter!(names::LOCK_ACQUIRED_TOTAL, "lock" => lock_name.to_string()).increment(1);
    }

    pub fn lock_lost(lock_name: &str) {
        counter!(names::LOCK_LOST_TOTAL, "lock" => lock_name.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        register_metrics();
    }

    #[test]
    fn test_recorders_without_exporter() {
        JobMetrics::job_enqueued(JobType::SyncAllDueUsers);
        JobMetrics::job_completed(JobType::SyncAllDueUsers, Duration::from_millis(20));
        JobMetrics::job_failed(JobType::SyncUserWatchlist, Duration::from_secs(1));
        JobMetrics::update_queue_sizes(&QueueStats::default());
        SchedulerMetrics::job_triggered("watchlist-sync-all", JobType::SyncAllDueUsers);
        LockMetrics::update_leader_status("background-worker", true);
    }
}
