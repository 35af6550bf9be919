//! Portal Jobs - Distributed Job Queue
//!
//! A Redis-backed job queue for the portal's background work:
//! - Closed set of job types with an exhaustive handler table
//! - Unique keys that coalesce duplicate pending jobs
//! - Automatic retries with fixed or exponential backoff
//! - Priority and delayed jobs, pause and resume
//! - Recurring schedules keyed by a stable id
//! - Worker heartbeats and a stalled-job sweep
//! - Leader election so only one instance runs the worker
//!
//! # Architecture
//!
//! ```text
//!  Scheduler / admin action
//!         │ enqueue
//!         ▼
//!  ┌────────────────────────────── Redis ──────────────────────────────┐
//!  │  wait:{type}   delayed:{type}   active   completed   failed        │
//!  │  job:{id}      unique:{key}     paused   schedulers  workers       │
//!  └───────────────────────────────────────────────────────────────────┘
//!         │ dequeue (one consumer per job type)
//!         ▼
//!  WorkerPool ── JobHandlers ──► sync-one-user | sync-all-due-users
//!         ▲
//!         └── runs only while LeaderElector holds the lease
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use portal_jobs::prelude::*;
//!
//! let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::from_config(pool, &config.jobs));
//! queue
//!     .enqueue(
//!         JobPayload::SyncUserWatchlist { user_id },
//!         EnqueueOptions::default().unique(format!("watchlist-sync:user:{user_id}")),
//!     )
//!     .await?;
//! ```

pub mod admin;
pub mod error;
pub mod job;
pub mod lock;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod redis;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use admin::{DashboardData, JobsPage, QueueAdmin};
pub use error::{JobError, JobResult};
pub use job::{EnqueueOptions, JobContext, JobId, JobPayload, JobRecord, JobStatus, JobType, QueueDefaults};
pub use lock::LeaderElector;
pub use metrics::{register_metrics, JobMetrics, LockMetrics, SchedulerMetrics};
pub use queue::{FailOutcome, JobFilter, JobQueue, QueueStats};
pub use crate::redis::{create_pool, RedisJobQueue, RedisLeaseStore};
pub use retry::{BackoffPolicy, BackoffStrategy};
pub use scheduler::{RecurringSchedule, SchedulePattern, ScheduleSpec, Scheduler, SchedulerInfo};
pub use worker::{JobHandler, JobHandlers, WorkerPool, WorkerPoolConfig};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::job::{EnqueueOptions, JobPayload, JobStatus, JobType};
    pub use crate::queue::JobQueue;
    pub use crate::redis::RedisJobQueue;
    pub use crate::retry::BackoffPolicy;
    pub use crate::worker::JobHandler;
    pub use crate::{JobContext, JobError, JobId, JobResult};
    pub use std::sync::Arc;
}
