//! Recurring job schedules.
//!
//! Schedules live in the queue backend, keyed by a stable id, so that
//! re-registering one replaces it and any instance can read them for the
//! dashboard. Only the lock holder runs [`Scheduler::run`].

use crate::error::{JobError, JobResult};
use crate::job::{EnqueueOptions, JobPayload, JobType};
use crate::metrics::SchedulerMetrics;
use crate::queue::JobQueue;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// When a recurring schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SchedulePattern {
    /// Fixed interval.
    Every { minutes: u32 },
    /// Six-field cron expression (seconds first).
    Cron { expression: String },
}

impl SchedulePattern {
    /// Fixed interval in minutes.
    #[must_use]
    pub const fn every_minutes(minutes: u32) -> Self {
        Self::Every { minutes }
    }

    /// Parses and validates a cron expression.
    pub fn cron(expression: impl Into<String>) -> JobResult<Self> {
        let expression = expression.into();
        parse_cron(&expression)?;
        Ok(Self::Cron { expression })
    }

    /// First fire time strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> JobResult<DateTime<Utc>> {
        match self {
            Self::Every { minutes } => {
                if *minutes == 0 {
                    return Err(JobError::Configuration("schedule interval must be positive".to_string()));
                }
                Ok(from + chrono::Duration::minutes(i64::from(*minutes)))
            }
            Self::Cron { expression } => parse_cron(expression)?
                .after(&from)
                .next()
                .ok_or_else(|| JobError::Configuration(format!("cron expression never fires: {expression}"))),
        }
    }
}

impl fmt::Display for SchedulePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Every { minutes } => write!(f, "every {minutes}m"),
            Self::Cron { expression } => f.write_str(expression),
        }
    }
}

fn parse_cron(expression: &str) -> JobResult<Schedule> {
    Schedule::from_str(expression)
        .map_err(|e| JobError::Configuration(format!("Invalid cron expression: {}", e)))
}

/// Definition of a recurring schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    /// Stable id; registering the same id again replaces the schedule.
    pub id: String,
    pub payload: JobPayload,
    pub pattern: SchedulePattern,
}

/// A stored schedule with its next fire time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurringSchedule {
    pub spec: ScheduleSpec,
    pub next_run_at: DateTime<Utc>,
}

impl RecurringSchedule {
    /// Unique key of the job enqueued for the run at `next_run_at`.
    #[must_use]
    pub fn run_key(&self) -> String {
        format!("{}:{}", self.spec.id, self.next_run_at.timestamp_millis())
    }
}

/// Schedule summary for the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerInfo {
    pub id: String,
    pub job_type: JobType,
    pub pattern: String,
    pub next: DateTime<Utc>,
}

impl From<&RecurringSchedule> for SchedulerInfo {
    fn from(schedule: &RecurringSchedule) -> Self {
        Self {
            id: schedule.spec.id.clone(),
            job_type: schedule.spec.payload.job_type(),
            pattern: schedule.spec.pattern.to_string(),
            next: schedule.next_run_at,
        }
    }
}

/// Registers schedules and fires due ones into the queue.
pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    tick: Duration,
    shutdown_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
    jobs_triggered: Arc<AtomicU64>,
}

impl Scheduler {
    /// Create a new scheduler polling every `tick`.
    pub fn new(queue: Arc<dyn JobQueue>, tick: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue,
            tick,
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
            jobs_triggered: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registers or replaces the schedule `spec.id`. The first run is one
    /// pattern step from now.
    pub async fn schedule_recurring(&self, spec: ScheduleSpec) -> JobResult<RecurringSchedule> {
        let next_run_at = spec.pattern.next_after(Utc::now())?;
        self.queue.upsert_schedule(&spec, next_run_at).await?;

        info!(
            schedule_id = %spec.id,
            job_type = %spec.payload.job_type(),
            pattern = %spec.pattern,
            next_run_at = %next_run_at,
            "Registered recurring schedule"
        );

        Ok(RecurringSchedule { spec, next_run_at })
    }

    /// Removes a schedule. Returns false when it did not exist.
    pub async fn unschedule(&self, id: &str) -> JobResult<bool> {
        let removed = self.queue.remove_schedule(id).await?;
        if removed {
            info!(schedule_id = %id, "Removed recurring schedule");
        }
        Ok(removed)
    }

    /// Lists schedules for the dashboard.
    pub async fn list(&self) -> JobResult<Vec<SchedulerInfo>> {
        let schedules = self.queue.list_schedules().await?;
        Ok(schedules.iter().map(SchedulerInfo::from).collect())
    }

    /// Fires every schedule due at `now`. Returns how many fired.
    ///
    /// Missed runs collapse into one: the next run is computed from `now`,
    /// not from the missed fire time.
    pub async fn fire_due(&self, now: DateTime<Utc>) -> JobResult<usize> {
        let mut fired = 0;

        for schedule in self.queue.list_schedules().await? {
            if schedule.next_run_at > now {
                continue;
            }

            let job_type = schedule.spec.payload.job_type();
            let job_id = self
                .queue
                .enqueue(
                    schedule.spec.payload.clone(),
                    EnqueueOptions::default().unique(schedule.run_key()),
                )
                .await?;

            let next = schedule.spec.pattern.next_after(now)?;
            let advanced = self
                .queue
                .advance_schedule(&schedule.spec.id, schedule.next_run_at, next)
                .await?;

            if !advanced {
                debug!(schedule_id = %schedule.spec.id, "Schedule changed while firing");
            }

            debug!(
                schedule_id = %schedule.spec.id,
                job_id = %job_id,
                next_run_at = %next,
                "Fired recurring schedule"
            );
            SchedulerMetrics::job_triggered(&schedule.spec.id, job_type);
            self.jobs_triggered.fetch_add(1, Ordering::Relaxed);
            fired += 1;
        }

        Ok(fired)
    }

    /// Runs the tick loop until [`Scheduler::stop`].
    pub async fn run(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Configuration("Scheduler already running".to_string()));
        }

        info!(tick_secs = self.tick.as_secs(), "Starting scheduler");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = interval(self.tick);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.fire_due(Utc::now()).await {
                        error!(error = %e, "Failed to fire recurring schedules");
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(
            jobs_triggered = self.jobs_triggered.load(Ordering::Relaxed),
            "Scheduler stopped"
        );
        Ok(())
    }

    /// Stop the tick loop.
    pub fn stop(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("Scheduler stop requested but it is not running");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn jobs_triggered(&self) -> u64 {
        self.jobs_triggered.load(Ordering::Relaxed)
    }
}
