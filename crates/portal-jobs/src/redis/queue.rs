//! Redis job queue implementation.

use super::scripts::{
    ADVANCE_SCHEDULE_SCRIPT, CLEAN_SCRIPT, COMPLETE_SCRIPT, DEQUEUE_SCRIPT, ENQUEUE_SCRIPT, FAIL_SCRIPT,
    PROMOTE_SCRIPT, REMOVE_SCRIPT, RETRY_SCRIPT,
};
use super::{priority_score, RedisKeys};
use crate::error::{JobError, JobResult};
use crate::job::{EnqueueOptions, JobId, JobPayload, JobRecord, JobStatus, JobType, QueueDefaults};
use crate::metrics::JobMetrics;
use crate::queue::{page_records, stats_window_starts, FailOutcome, JobFilter, JobQueue, QueueStats, STALLED_ERROR};
use crate::scheduler::{RecurringSchedule, ScheduleSpec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use portal_config::JobsConfig;
use portal_core::{ttl_to_chrono, PageRequest, Paged};
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

struct Scripts {
    enqueue: Script,
    promote: Script,
    dequeue: Script,
    complete: Script,
    fail: Script,
    retry: Script,
    remove: Script,
    advance_schedule: Script,
    clean: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            enqueue: Script::new(ENQUEUE_SCRIPT),
            promote: Script::new(PROMOTE_SCRIPT),
            dequeue: Script::new(DEQUEUE_SCRIPT),
            complete: Script::new(COMPLETE_SCRIPT),
            fail: Script::new(FAIL_SCRIPT),
            retry: Script::new(RETRY_SCRIPT),
            remove: Script::new(REMOVE_SCRIPT),
            advance_schedule: Script::new(ADVANCE_SCHEDULE_SCRIPT),
            clean: Script::new(CLEAN_SCRIPT),
        }
    }
}

/// Redis-backed job queue.
pub struct RedisJobQueue {
    pool: Pool,
    keys: RedisKeys,
    defaults: QueueDefaults,
    scripts: Scripts,
}

impl RedisJobQueue {
    /// Create a new Redis job queue.
    pub fn new(pool: Pool, key_prefix: impl Into<String>, defaults: QueueDefaults) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(key_prefix),
            defaults,
            scripts: Scripts::load(),
        }
    }

    /// Create a queue with the prefix and defaults from configuration.
    pub fn from_config(pool: Pool, config: &JobsConfig) -> Self {
        Self::new(pool, config.key_prefix.clone(), QueueDefaults::from(config))
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    async fn load_many(&self, ids: &[String]) -> JobResult<Vec<JobRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.hgetall(self.keys.job(id));
        }
        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut *conn).await?;

        let mut records = Vec::with_capacity(hashes.len());
        for hash in hashes {
            // A job removed between the id scan and the load reads back empty.
            if let Some(record) = record_from_hash(hash)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn promote_type(&self, conn: &mut deadpool_redis::Connection, job_type: JobType) -> JobResult<u64> {
        let promoted: u64 = self
            .scripts
            .promote
            .key(self.keys.wait(job_type))
            .key(self.keys.delayed(job_type))
            .arg(Utc::now().timestamp_millis())
            .arg(self.keys.job_prefix())
            .invoke_async(&mut **conn)
            .await?;
        Ok(promoted)
    }

    async fn require_job(&self, job_id: &JobId) -> JobResult<JobRecord> {
        self.get_job(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, payload: JobPayload, options: EnqueueOptions) -> JobResult<JobId> {
        let now = Utc::now();
        let record = JobRecord::new(payload, &options, &self.defaults, now);
        let fields = record_fields(&record)?;

        let (target, score) = if record.status == JobStatus::Delayed {
            let run_at = now + ttl_to_chrono(options.delay.unwrap_or_default());
            #[allow(clippy::cast_precision_loss)]
            let score = run_at.timestamp_millis() as f64;
            (self.keys.delayed(record.job_type), score)
        } else {
            (
                self.keys.wait(record.job_type),
                priority_score(record.priority, now.timestamp_millis()),
            )
        };
        let unique_key = record.unique_key.as_deref().unwrap_or_default();

        let mut invocation = self.scripts.enqueue.key(self.keys.job(record.id.as_str()));
        invocation
            .key(target)
            .key(self.keys.unique(unique_key))
            .key(self.keys.index())
            .arg(record.id.as_str())
            .arg(score)
            .arg(if record.unique_key.is_some() { "1" } else { "0" })
            .arg(now.timestamp_millis())
            .arg(self.keys.job_prefix());
        for (field, value) in &fields {
            invocation.arg(*field).arg(value);
        }

        let mut conn = self.conn().await?;
        let stored: String = invocation.invoke_async(&mut *conn).await?;

        if stored == record.id.as_str() {
            JobMetrics::job_enqueued(record.job_type);
            debug!(
                job_id = %record.id,
                job_type = %record.job_type,
                status = %record.status,
                "Enqueued job"
            );
        } else {
            debug!(
                job_id = %stored,
                unique_key = %unique_key,
                "Unique key already taken, returning existing job"
            );
        }

        Ok(JobId::from(stored))
    }

    async fn dequeue(&self, job_type: JobType, worker_id: &str) -> JobResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        self.promote_type(&mut conn, job_type).await?;

        let claimed: Option<String> = self
            .scripts
            .dequeue
            .key(self.keys.wait(job_type))
            .key(self.keys.active())
            .key(self.keys.paused())
            .arg(Utc::now().timestamp_millis())
            .arg(worker_id)
            .arg(self.keys.job_prefix())
            .invoke_async(&mut *conn)
            .await?;

        let Some(id) = claimed else {
            return Ok(None);
        };

        let hash: HashMap<String, String> = conn.hgetall(self.keys.job(&id)).await?;
        let record = record_from_hash(hash)?.ok_or_else(|| JobError::NotFound(id.clone()))?;

        debug!(job_id = %id, job_type = %job_type, worker_id = %worker_id, "Dequeued job");
        Ok(Some(record))
    }

    async fn complete(&self, job_id: &JobId, return_value: serde_json::Value) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let completed: i32 = self
            .scripts
            .complete
            .key(self.keys.job(job_id.as_str()))
            .key(self.keys.active())
            .key(self.keys.completed())
            .arg(job_id.as_str())
            .arg(Utc::now().timestamp_millis())
            .arg(serde_json::to_string(&return_value)?)
            .arg(self.keys.unique_prefix())
            .invoke_async(&mut *conn)
            .await?;

        if completed == 0 {
            return Err(JobError::InvalidState(format!("job {job_id} is not active")));
        }
        Ok(())
    }

    async fn fail(&self, job_id: &JobId, error: &str) -> JobResult<FailOutcome> {
        let record = self.require_job(job_id).await?;
        let now = Utc::now();
        let run_at = now + ttl_to_chrono(record.backoff.delay_after(record.attempts));

        let mut conn = self.conn().await?;
        let result: i64 = self
            .scripts
            .fail
            .key(self.keys.job(job_id.as_str()))
            .key(self.keys.active())
            .key(self.keys.delayed(record.job_type))
            .key(self.keys.failed())
            .arg(job_id.as_str())
            .arg(now.timestamp_millis())
            .arg(error)
            .arg(run_at.timestamp_millis())
            .arg(self.keys.unique_prefix())
            .invoke_async(&mut *conn)
            .await?;

        match result {
            -1 => Err(JobError::InvalidState(format!("job {job_id} is not active"))),
            0 => Ok(FailOutcome::Failed),
            attempt => Ok(FailOutcome::Retrying {
                attempt: u32::try_from(attempt).unwrap_or(u32::MAX),
                run_at,
            }),
        }
    }

    async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> JobResult<()> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let now_ms = Utc::now().timestamp_millis();
        #[allow(clippy::cast_precision_loss)]
        let expires_at = (now_ms + i64::try_from(ttl_ms).unwrap_or(i64::MAX)) as f64;

        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .pset_ex(self.keys.worker(worker_id), "1", ttl_ms)
            .ignore()
            .zadd(self.keys.workers(), worker_id, expires_at)
            .ignore()
            .zrembyscore(self.keys.workers(), "-inf", now_ms)
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn clear_heartbeat(&self, worker_id: &str) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .del(self.keys.worker(worker_id))
            .ignore()
            .zrem(self.keys.workers(), worker_id)
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn has_live_workers(&self) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let live: u64 = conn
            .zcount(self.keys.workers(), Utc::now().timestamp_millis(), "+inf")
            .await?;
        Ok(live > 0)
    }

    async fn get_job(&self, job_id: &JobId) -> JobResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        let hash: HashMap<String, String> = conn.hgetall(self.keys.job(job_id.as_str())).await?;
        record_from_hash(hash)
    }

    async fn stats(&self) -> JobResult<QueueStats> {
        let (completed_since, failed_since) = stats_window_starts(Utc::now());

        let mut pipe = redis::pipe();
        for job_type in JobType::ALL {
            pipe.zcard(self.keys.wait(job_type));
        }
        for job_type in JobType::ALL {
            pipe.zcard(self.keys.delayed(job_type));
        }
        pipe.hlen(self.keys.active())
            .zcount(self.keys.completed(), completed_since.timestamp_millis(), "+inf")
            .zcount(self.keys.failed(), failed_since.timestamp_millis(), "+inf");

        let mut conn = self.conn().await?;
        let counts: Vec<u64> = pipe.query_async(&mut *conn).await?;

        let types = JobType::ALL.len();
        let count_at = |i: usize| counts.get(i).copied().unwrap_or_default();

        Ok(QueueStats {
            waiting: (0..types).map(count_at).sum(),
            delayed: (types..2 * types).map(count_at).sum(),
            active: count_at(2 * types),
            completed: count_at(2 * types + 1),
            failed: count_at(2 * types + 2),
        })
    }

    async fn list_jobs(&self, filter: JobFilter, page: PageRequest) -> JobResult<Paged<JobRecord>> {
        let types: Vec<JobType> = match filter.job_type {
            Some(job_type) => vec![job_type],
            None => JobType::ALL.to_vec(),
        };

        let mut conn = self.conn().await?;
        let ids: Vec<String> = match filter.status {
            None => conn.zrange(self.keys.index(), 0, -1).await?,
            Some(JobStatus::Waiting | JobStatus::Prioritized) => {
                let mut ids = Vec::new();
                for job_type in &types {
                    let mut batch: Vec<String> = conn.zrange(self.keys.wait(*job_type), 0, -1).await?;
                    ids.append(&mut batch);
                }
                ids
            }
            Some(JobStatus::Delayed) => {
                let mut ids = Vec::new();
                for job_type in &types {
                    let mut batch: Vec<String> = conn.zrange(self.keys.delayed(*job_type), 0, -1).await?;
                    ids.append(&mut batch);
                }
                ids
            }
            Some(JobStatus::Active) => conn.hkeys(self.keys.active()).await?,
            Some(JobStatus::Completed) => conn.zrange(self.keys.completed(), 0, -1).await?,
            Some(JobStatus::Failed) => conn.zrange(self.keys.failed(), 0, -1).await?,
        };
        drop(conn);

        let records = self.load_many(&ids).await?;
        Ok(page_records(records, filter, page))
    }

    async fn retry(&self, job_id: &JobId) -> JobResult<()> {
        let record = self.require_job(job_id).await?;

        let mut conn = self.conn().await?;
        let retried: i32 = self
            .scripts
            .retry
            .key(self.keys.job(job_id.as_str()))
            .key(self.keys.failed())
            .key(self.keys.wait(record.job_type))
            .arg(job_id.as_str())
            .arg(Utc::now().timestamp_millis())
            .arg(self.keys.unique_prefix())
            .invoke_async(&mut *conn)
            .await?;

        if retried == 0 {
            return Err(JobError::NotFound(job_id.to_string()));
        }

        info!(job_id = %job_id, job_type = %record.job_type, "Retrying failed job");
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> JobResult<()> {
        let record = self.require_job(job_id).await?;

        let mut conn = self.conn().await?;
        let removed: i32 = self
            .scripts
            .remove
            .key(self.keys.job(job_id.as_str()))
            .key(self.keys.wait(record.job_type))
            .key(self.keys.delayed(record.job_type))
            .key(self.keys.completed())
            .key(self.keys.failed())
            .key(self.keys.index())
            .arg(job_id.as_str())
            .arg(self.keys.unique_prefix())
            .invoke_async(&mut *conn)
            .await?;

        match removed {
            -1 => Err(JobError::InvalidState("Cannot remove an active job".to_string())),
            0 => Err(JobError::NotFound(job_id.to_string())),
            _ => {
                info!(job_id = %job_id, "Removed job");
                Ok(())
            }
        }
    }

    async fn pause(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set(self.keys.paused(), "1").await?;
        info!("Job queue paused");
        Ok(())
    }

    async fn resume(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(self.keys.paused()).await?;
        info!("Job queue resumed");
        Ok(())
    }

    async fn is_paused(&self) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(self.keys.paused()).await?)
    }

    async fn upsert_schedule(&self, spec: &ScheduleSpec, next_run_at: DateTime<Utc>) -> JobResult<()> {
        let json = serde_json::to_string(spec)?;
        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .hset(self.keys.schedulers(), &spec.id, json)
            .ignore()
            .zadd(self.keys.schedulers_next(), &spec.id, next_run_at.timestamp_millis())
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn remove_schedule(&self, id: &str) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let (removed, _): (u64, u64) = redis::pipe()
            .atomic()
            .hdel(self.keys.schedulers(), id)
            .zrem(self.keys.schedulers_next(), id)
            .query_async(&mut *conn)
            .await?;
        Ok(removed > 0)
    }

    async fn list_schedules(&self) -> JobResult<Vec<RecurringSchedule>> {
        let mut conn = self.conn().await?;
        let specs: HashMap<String, String> = conn.hgetall(self.keys.schedulers()).await?;
        let next_runs: Vec<(String, f64)> = conn.zrange_withscores(self.keys.schedulers_next(), 0, -1).await?;
        let next_runs: HashMap<String, f64> = next_runs.into_iter().collect();

        let mut schedules = Vec::with_capacity(specs.len());
        for (id, json) in specs {
            let spec: ScheduleSpec = serde_json::from_str(&json)?;
            #[allow(clippy::cast_possible_truncation)]
            let next_run_at = next_runs
                .get(&id)
                .and_then(|ms| DateTime::from_timestamp_millis(*ms as i64));

            match next_run_at {
                Some(next_run_at) => schedules.push(RecurringSchedule { spec, next_run_at }),
                None => warn!(schedule_id = %id, "Schedule has no next run, skipping"),
            }
        }
        schedules.sort_by(|a, b| a.spec.id.cmp(&b.spec.id));
        Ok(schedules)
    }

    async fn advance_schedule(&self, id: &str, expected: DateTime<Utc>, next: DateTime<Utc>) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let advanced: i32 = self
            .scripts
            .advance_schedule
            .key(self.keys.schedulers_next())
            .arg(id)
            .arg(expected.timestamp_millis())
            .arg(next.timestamp_millis())
            .invoke_async(&mut *conn)
            .await?;
        Ok(advanced == 1)
    }

    async fn promote_delayed(&self) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let mut promoted = 0;
        for job_type in JobType::ALL {
            promoted += self.promote_type(&mut conn, job_type).await?;
        }
        if promoted > 0 {
            debug!(count = promoted, "Promoted delayed jobs");
        }
        Ok(promoted)
    }

    async fn recover_stalled(&self) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let active: HashMap<String, String> = conn.hgetall(self.keys.active()).await?;

        let mut recovered = 0u64;
        for (job_id, worker_id) in active {
            let worker_alive: bool = conn.exists(self.keys.worker(&worker_id)).await?;
            if worker_alive {
                continue;
            }

            match self.fail(&JobId::from(job_id.as_str()), STALLED_ERROR).await {
                Ok(_) => {
                    recovered += 1;
                    warn!(job_id = %job_id, worker_id = %worker_id, "Recovered stalled job from dead worker");
                }
                // Finished or recovered elsewhere in the meantime.
                Err(JobError::InvalidState(_) | JobError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered stalled jobs");
        }
        Ok(recovered)
    }

    async fn clean(&self, completed_before: DateTime<Utc>, failed_before: DateTime<Utc>) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let mut deleted = 0u64;

        for (set, cutoff) in [
            (self.keys.completed(), completed_before),
            (self.keys.failed(), failed_before),
        ] {
            let count: u64 = self
                .scripts
                .clean
                .key(set)
                .key(self.keys.index())
                .arg(cutoff.timestamp_millis())
                .arg(self.keys.job_prefix())
                .invoke_async(&mut *conn)
                .await?;
            deleted += count;
        }

        if deleted > 0 {
            debug!(count = deleted, "Cleaned finished jobs");
        }
        Ok(deleted)
    }

    async fn health_check(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok(())
    }
}

/// Hash fields for a new job. Unset optional fields are left out.
fn record_fields(record: &JobRecord) -> JobResult<Vec<(&'static str, String)>> {
    let mut fields = vec![
        ("id", record.id.to_string()),
        ("type", record.job_type.as_str().to_string()),
        ("payload", serde_json::to_string(&record.payload)?),
        ("status", record.status.as_str().to_string()),
        ("priority", record.priority.to_string()),
        ("created_at", record.created_at.timestamp_millis().to_string()),
        ("attempts", record.attempts.to_string()),
        ("max_attempts", record.max_attempts.to_string()),
        ("backoff", serde_json::to_string(&record.backoff)?),
    ];
    if let Some(key) = &record.unique_key {
        fields.push(("unique_key", key.clone()));
    }
    Ok(fields)
}

/// Rebuilds a job from its hash. `None` for a missing key.
fn record_from_hash(mut hash: HashMap<String, String>) -> JobResult<Option<JobRecord>> {
    if hash.is_empty() {
        return Ok(None);
    }

    let id = take(&mut hash, "id")?;
    let record = JobRecord {
        job_type: parse(&take(&mut hash, "type")?, "type")?,
        payload: serde_json::from_str(&take(&mut hash, "payload")?)?,
        status: parse(&take(&mut hash, "status")?, "status")?,
        priority: parse(&take(&mut hash, "priority")?, "priority")?,
        created_at: parse_ms(&take(&mut hash, "created_at")?)?,
        started_at: hash.remove("started_at").as_deref().map(parse_ms).transpose()?,
        finished_at: hash.remove("finished_at").as_deref().map(parse_ms).transpose()?,
        attempts: parse(&take(&mut hash, "attempts")?, "attempts")?,
        max_attempts: parse(&take(&mut hash, "max_attempts")?, "max_attempts")?,
        last_error: hash.remove("last_error"),
        unique_key: hash.remove("unique_key"),
        backoff: serde_json::from_str(&take(&mut hash, "backoff")?)?,
        return_value: hash
            .remove("return_value")
            .map(|json| serde_json::from_str(&json))
            .transpose()?,
        id: JobId::from(id),
    };
    Ok(Some(record))
}

fn take(hash: &mut HashMap<String, String>, field: &str) -> JobResult<String> {
    hash.remove(field)
        .ok_or_else(|| JobError::InvalidState(format!("job record is missing field {field}")))
}

fn parse<T: FromStr>(value: &str, field: &str) -> JobResult<T> {
    value
        .parse()
        .map_err(|_| JobError::InvalidState(format!("job record has invalid {field}: {value}")))
}

fn parse_ms(value: &str) -> JobResult<DateTime<Utc>> {
    parse::<i64>(value, "timestamp")
        .and_then(|ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| JobError::InvalidState(format!("job record has invalid timestamp: {ms}")))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::UserId;

    #[test]
    fn test_record_hash_roundtrip() {
        let record = JobRecord::new(
            JobPayload::SyncUserWatchlist { user_id: UserId::new() },
            &EnqueueOptions::default().unique("watchlist-sync:user:1").priority(2),
            &QueueDefaults::default(),
            DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
        );

        let hash: HashMap<String, String> = record_fields(&record)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let restored = record_from_hash(hash).unwrap().unwrap();

        assert_eq!(restored, record);
    }

    #[test]
    fn test_record_from_hash_with_runtime_fields() {
        let record = JobRecord::new(
            JobPayload::SyncAllDueUsers,
            &EnqueueOptions::default(),
            &QueueDefaults::default(),
            DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        );
        let mut hash: HashMap<String, String> = record_fields(&record)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        hash.insert("status".into(), "failed".into());
        hash.insert("finished_at".into(), "1700000005000".into());
        hash.insert("last_error".into(), "boom".into());

        let restored = record_from_hash(hash).unwrap().unwrap();
        assert_eq!(restored.status, JobStatus::Failed);
        assert_eq!(restored.last_error.as_deref(), Some("boom"));
        assert_eq!(restored.finished_at.unwrap().timestamp_millis(), 1_700_000_005_000);
    }

    #[test]
    fn test_record_from_empty_hash() {
        assert!(record_from_hash(HashMap::new()).unwrap().is_none());

        let mut partial = HashMap::new();
        partial.insert("id".to_string(), "x".to_string());
        assert!(matches!(record_from_hash(partial), Err(JobError::InvalidState(_))));
    }
}
