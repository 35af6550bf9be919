//! Redis-backed queue and lease store.

mod lease;
mod queue;
pub mod scripts;

pub use lease::RedisLeaseStore;
pub use queue::RedisJobQueue;

use crate::error::{JobError, JobResult};
use crate::job::JobType;
use deadpool_redis::{Config, Pool, Runtime};
use portal_config::RedisConfig;
use tracing::info;

/// Create a Redis connection pool. Fails when Redis is not configured or
/// does not answer a PING.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| JobError::Configuration("Redis URL is not configured".to_string()))?;

    info!("Creating Redis connection pool for job queue...");

    let pool = Config::from_url(url)
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {}", e)))?;

    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder for the job queue.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Job record (hash of fields).
    pub fn job(&self, job_id: &str) -> String {
        format!("{}{}", self.job_prefix(), job_id)
    }

    /// Prefix of job record keys, for scripts that address jobs by id.
    pub fn job_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    /// Ready jobs of one type (sorted set by priority, then ready time).
    pub fn wait(&self, job_type: JobType) -> String {
        format!("{}:wait:{}", self.prefix, job_type.as_str())
    }

    /// Delayed jobs of one type (sorted set by run-at time).
    pub fn delayed(&self, job_type: JobType) -> String {
        format!("{}:delayed:{}", self.prefix, job_type.as_str())
    }

    /// Active jobs (hash: job_id -> worker_id).
    pub fn active(&self) -> String {
        format!("{}:active", self.prefix)
    }

    /// Completed jobs (sorted set by finish time).
    pub fn completed(&self) -> String {
        format!("{}:completed", self.prefix)
    }

    /// Failed jobs (sorted set by finish time).
    pub fn failed(&self) -> String {
        format!("{}:failed", self.prefix)
    }

    /// All jobs (sorted set by creation time).
    pub fn index(&self) -> String {
        format!("{}:index:all", self.prefix)
    }

    /// Unique key claim, holds the owning job id.
    pub fn unique(&self, key: &str) -> String {
        format!("{}{}", self.unique_prefix(), key)
    }

    pub fn unique_prefix(&self) -> String {
        format!("{}:unique:", self.prefix)
    }

    /// Queue-wide pause flag.
    pub fn paused(&self) -> String {
        format!("{}:paused", self.prefix)
    }

    /// Worker heartbeat key with TTL.
    pub fn worker(&self, worker_id: &str) -> String {
        format!("{}:worker:{}", self.prefix, worker_id)
    }

    /// Live workers (sorted set by heartbeat expiry).
    pub fn workers(&self) -> String {
        format!("{}:workers", self.prefix)
    }

    /// Recurring schedules (hash: id -> spec JSON).
    pub fn schedulers(&self) -> String {
        format!("{}:schedulers", self.prefix)
    }

    /// Next run of each schedule (sorted set: id -> run-at ms).
    pub fn schedulers_next(&self) -> String {
        format!("{}:schedulers:next", self.prefix)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("portal:jobs")
    }
}

/// Wait-set score: higher priority first, then oldest first.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn priority_score(priority: u32, ready_at_ms: i64) -> f64 {
    -(f64::from(priority)) * 1_000_000_000_000.0 + ready_at_ms as f64
}
