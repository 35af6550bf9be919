//! Job definitions.

use crate::retry::BackoffPolicy;
use chrono::{DateTime, Utc};
use portal_core::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a new time-ordered job ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the job ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Closed set of job types. Adding a variant forces a handler for it in
/// [`crate::worker::JobHandlers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    /// Sync one user's watchlist.
    #[serde(rename = "sync-one-user")]
    SyncUserWatchlist,
    /// Sync every user whose last sync is older than the interval.
    SyncAllDueUsers,
}

impl JobType {
    pub const ALL: [Self; 2] = [Self::SyncUserWatchlist, Self::SyncAllDueUsers];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SyncUserWatchlist => "sync-one-user",
            Self::SyncAllDueUsers => "sync-all-due-users",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown job type: {s}"))
    }
}

/// Job payload, tagged by job type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JobPayload {
    #[serde(rename = "sync-one-user")]
    SyncUserWatchlist {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    SyncAllDueUsers,
}

impl JobPayload {
    #[must_use]
    pub const fn job_type(&self) -> JobType {
        match self {
            Self::SyncUserWatchlist { .. } => JobType::SyncUserWatchlist,
            Self::SyncAllDueUsers => JobType::SyncAllDueUsers,
        }
    }
}

/// Job status as stored in the queue backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Ready to run.
    Waiting,
    /// Ready to run, ahead of normal-priority jobs.
    Prioritized,
    /// Waiting for a delay or a retry backoff to elapse.
    Delayed,
    /// Picked up by a worker.
    Active,
    /// Handler succeeded.
    Completed,
    /// Handler failed and no automatic retry is left.
    Failed,
}

impl JobStatus {
    pub const ALL: [Self; 6] = [
        Self::Waiting,
        Self::Prioritized,
        Self::Delayed,
        Self::Active,
        Self::Completed,
        Self::Failed,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Prioritized => "prioritized",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status: {s}"))
    }
}

/// Stored job, also the shape listed on the admin dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub priority: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of the current or last attempt (1-based).
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub unique_key: Option<String>,
    pub backoff: BackoffPolicy,
    /// Handler output of a completed job.
    pub return_value: Option<serde_json::Value>,
}

impl JobRecord {
    /// Builds a fresh record for `payload`.
    #[must_use]
    pub fn new(payload: JobPayload, options: &EnqueueOptions, defaults: &QueueDefaults, now: DateTime<Utc>) -> Self {
        let status = if options.delay.is_some_and(|d| !d.is_zero()) {
            JobStatus::Delayed
        } else if options.priority > 0 {
            JobStatus::Prioritized
        } else {
            JobStatus::Waiting
        };

        Self {
            id: JobId::new(),
            job_type: payload.job_type(),
            payload,
            status,
            priority: options.priority,
            created_at: now,
            started_at: None,
            finished_at: None,
            attempts: 1,
            max_attempts: options.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            last_error: None,
            unique_key: options.unique_key.clone(),
            backoff: options.backoff.unwrap_or(defaults.backoff),
            return_value: None,
        }
    }

    /// True when an automatic retry is still allowed after a failure.
    #[must_use]
    pub fn can_auto_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Execution context for the current attempt.
    #[must_use]
    pub fn context(&self, worker_id: &str) -> JobContext {
        JobContext {
            job_id: self.id.clone(),
            job_type: self.job_type,
            attempt: self.attempts,
            max_attempts: self.max_attempts,
            worker_id: worker_id.to_string(),
            started_at: self.started_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Execution context handed to a handler.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub job_type: JobType,
    /// Current attempt number (1-based).
    pub attempt: u32,
    pub max_attempts: u32,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
}

impl JobContext {
    /// Returns true if this is the last automatic attempt.
    #[must_use]
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Per-enqueue options.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// A second enqueue with the same key returns the existing job while
    /// that job is not finished.
    pub unique_key: Option<String>,
    pub delay: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub backoff: Option<BackoffPolicy>,
    /// Higher runs first. 0 is normal priority.
    pub priority: u32,
}

impl EnqueueOptions {
    #[must_use]
    pub fn unique(mut self, key: impl Into<String>) -> Self {
        self.unique_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Queue-wide defaults applied when enqueue options leave a field unset.
#[derive(Debug, Clone, Copy)]
pub struct QueueDefaults {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for QueueDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl From<&portal_config::JobsConfig> for QueueDefaults {
    fn from(config: &portal_config::JobsConfig) -> Self {
        Self {
            max_attempts: config.default_max_attempts,
            backoff: BackoffPolicy::exponential(Duration::from_millis(config.backoff_initial_ms)),
        }
    }
}
