//! In-memory queue and lease store.
//!
//! Same contracts as the Redis backends, held in a single process. Used by
//! tests here and, through the `test-util` feature, in dependent crates.

use crate::error::{JobError, JobResult};
use crate::job::{EnqueueOptions, JobId, JobPayload, JobRecord, JobStatus, JobType, QueueDefaults};
use crate::queue::{page_records, stats_window_starts, FailOutcome, JobFilter, JobQueue, QueueStats, STALLED_ERROR};
use crate::scheduler::{RecurringSchedule, ScheduleSpec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use portal_core::{ttl_to_chrono, Lease, LeaseStore, PageRequest, Paged, PortalResult};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, JobRecord>,
    /// Ready order: lower sorts first.
    ready_seq: HashMap<JobId, u64>,
    next_seq: u64,
    run_at: HashMap<JobId, DateTime<Utc>>,
    active: HashMap<JobId, String>,
    unique: HashMap<String, JobId>,
    heartbeats: HashMap<String, DateTime<Utc>>,
    schedules: BTreeMap<String, RecurringSchedule>,
    paused: bool,
}

impl QueueState {
    fn mark_ready(&mut self, id: &JobId) {
        self.next_seq += 1;
        self.ready_seq.insert(id.clone(), self.next_seq);
    }

    fn release_unique(&mut self, record: &JobRecord) {
        if let Some(key) = &record.unique_key {
            if self.unique.get(key) == Some(&record.id) {
                self.unique.remove(key);
            }
        }
    }

    fn promote(&mut self, now: DateTime<Utc>) -> u64 {
        let due: Vec<JobId> = self
            .run_at
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &due {
            self.run_at.remove(id);
            if let Some(job) = self.jobs.get_mut(id) {
                job.status = ready_status(job.priority);
            }
            self.mark_ready(id);
        }
        due.len() as u64
    }

    fn fail_active(&mut self, job_id: &JobId, error: &str, now: DateTime<Utc>) -> JobResult<FailOutcome> {
        if self.active.remove(job_id).is_none() {
            return Err(JobError::InvalidState(format!("job {job_id} is not active")));
        }
        let record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        record.last_error = Some(error.to_string());

        if record.can_auto_retry() {
            let delay = record.backoff.delay_after(record.attempts);
            let run_at = now + ttl_to_chrono(delay);
            record.attempts += 1;
            record.status = JobStatus::Delayed;
            let attempt = record.attempts;
            self.run_at.insert(job_id.clone(), run_at);
            return Ok(FailOutcome::Retrying { attempt, run_at });
        }

        record.status = JobStatus::Failed;
        record.finished_at = Some(now);
        let record = record.clone();
        self.release_unique(&record);
        Ok(FailOutcome::Failed)
    }

    fn live_worker(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.heartbeats.get(worker_id).is_some_and(|expires| *expires > now)
    }
}

fn ready_status(priority: u32) -> JobStatus {
    if priority > 0 {
        JobStatus::Prioritized
    } else {
        JobStatus::Waiting
    }
}

/// Job queue held in process memory.
#[derive(Default)]
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    defaults: QueueDefaults,
}

impl InMemoryJobQueue {
    #[must_use]
    pub fn new(defaults: QueueDefaults) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            defaults,
        }
    }

    /// Makes every delayed job due now. Lets tests skip backoff delays.
    pub fn expire_delays(&self) {
        let mut state = self.state.lock();
        let now = Utc::now();
        for at in state.run_at.values_mut() {
            *at = now;
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, payload: JobPayload, options: EnqueueOptions) -> JobResult<JobId> {
        let now = Utc::now();
        let mut state = self.state.lock();

        if let Some(key) = &options.unique_key {
            if let Some(existing) = state.unique.get(key) {
                return Ok(existing.clone());
            }
        }

        let record = JobRecord::new(payload, &options, &self.defaults, now);
        let id = record.id.clone();

        if let Some(key) = &record.unique_key {
            state.unique.insert(key.clone(), id.clone());
        }
        if record.status == JobStatus::Delayed {
            let delay = options.delay.unwrap_or_default();
            state.run_at.insert(id.clone(), now + ttl_to_chrono(delay));
        } else {
            state.mark_ready(&id);
        }
        state.jobs.insert(id.clone(), record);

        Ok(id)
    }

    async fn dequeue(&self, job_type: JobType, worker_id: &str) -> JobResult<Option<JobRecord>> {
        let now = Utc::now();
        let mut state = self.state.lock();
        if state.paused {
            return Ok(None);
        }
        state.promote(now);

        let next = state
            .ready_seq
            .iter()
            .filter_map(|(id, seq)| {
                let job = state.jobs.get(id)?;
                (job.job_type == job_type).then_some((std::cmp::Reverse(job.priority), *seq, id))
            })
            .min_by_key(|(priority, seq, _)| (*priority, *seq))
            .map(|(_, _, id)| id.clone());

        let Some(id) = next else {
            return Ok(None);
        };

        state.ready_seq.remove(&id);
        state.active.insert(id.clone(), worker_id.to_string());
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        job.status = JobStatus::Active;
        job.started_at = Some(now);
        Ok(Some(job.clone()))
    }

    async fn complete(&self, job_id: &JobId, return_value: serde_json::Value) -> JobResult<()> {
        let mut state = self.state.lock();
        if state.active.remove(job_id).is_none() {
            return Err(JobError::InvalidState(format!("job {job_id} is not active")));
        }
        let record = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        record.status = JobStatus::Completed;
        record.finished_at = Some(Utc::now());
        record.return_value = Some(return_value);
        let record = record.clone();
        state.release_unique(&record);
        Ok(())
    }

    async fn fail(&self, job_id: &JobId, error: &str) -> JobResult<FailOutcome> {
        self.state.lock().fail_active(job_id, error, Utc::now())
    }

    async fn heartbeat(&self, worker_id: &str, ttl: Duration) -> JobResult<()> {
        let expires = Utc::now() + ttl_to_chrono(ttl);
        self.state.lock().heartbeats.insert(worker_id.to_string(), expires);
        Ok(())
    }

    async fn clear_heartbeat(&self, worker_id: &str) -> JobResult<()> {
        self.state.lock().heartbeats.remove(worker_id);
        Ok(())
    }

    async fn has_live_workers(&self) -> JobResult<bool> {
        let now = Utc::now();
        Ok(self.state.lock().heartbeats.values().any(|expires| *expires > now))
    }

    async fn get_job(&self, job_id: &JobId) -> JobResult<Option<JobRecord>> {
        Ok(self.state.lock().jobs.get(job_id).cloned())
    }

    async fn stats(&self) -> JobResult<QueueStats> {
        let (completed_since, failed_since) = stats_window_starts(Utc::now());
        let state = self.state.lock();
        let mut stats = QueueStats::default();

        for job in state.jobs.values() {
            match job.status {
                JobStatus::Waiting | JobStatus::Prioritized => stats.waiting += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Delayed => stats.delayed += 1,
                JobStatus::Completed => {
                    if job.finished_at.is_some_and(|at| at >= completed_since) {
                        stats.completed += 1;
                    }
                }
                JobStatus::Failed => {
                    if job.finished_at.is_some_and(|at| at >= failed_since) {
                        stats.failed += 1;
                    }
                }
            }
        }

        Ok(stats)
    }

    async fn list_jobs(&self, filter: JobFilter, page: PageRequest) -> JobResult<Paged<JobRecord>> {
        let records: Vec<JobRecord> = self.state.lock().jobs.values().cloned().collect();
        Ok(page_records(records, filter, page))
    }

    async fn retry(&self, job_id: &JobId) -> JobResult<()> {
        let mut state = self.state.lock();
        let record = match state.jobs.get_mut(job_id) {
            Some(record) if record.status == JobStatus::Failed => record,
            _ => return Err(JobError::NotFound(job_id.to_string())),
        };

        record.attempts += 1;
        record.status = ready_status(record.priority);
        record.finished_at = None;
        record.last_error = None;
        let unique_key = record.unique_key.clone();

        if let Some(key) = unique_key {
            state.unique.entry(key).or_insert_with(|| job_id.clone());
        }
        state.mark_ready(job_id);
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> JobResult<()> {
        let mut state = self.state.lock();
        match state.jobs.get(job_id) {
            None => return Err(JobError::NotFound(job_id.to_string())),
            Some(job) if job.status == JobStatus::Active => {
                return Err(JobError::InvalidState("Cannot remove an active job".to_string()));
            }
            Some(_) => {}
        }

        if let Some(record) = state.jobs.remove(job_id) {
            state.release_unique(&record);
        }
        state.ready_seq.remove(job_id);
        state.run_at.remove(job_id);
        Ok(())
    }

    async fn pause(&self) -> JobResult<()> {
        self.state.lock().paused = true;
        Ok(())
    }

    async fn resume(&self) -> JobResult<()> {
        self.state.lock().paused = false;
        Ok(())
    }

    async fn is_paused(&self) -> JobResult<bool> {
        Ok(self.state.lock().paused)
    }

    async fn upsert_schedule(&self, spec: &ScheduleSpec, next_run_at: DateTime<Utc>) -> JobResult<()> {
        self.state.lock().schedules.insert(
            spec.id.clone(),
            RecurringSchedule {
                spec: spec.clone(),
                next_run_at,
            },
        );
        Ok(())
    }

    async fn remove_schedule(&self, id: &str) -> JobResult<bool> {
        Ok(self.state.lock().schedules.remove(id).is_some())
    }

    async fn list_schedules(&self) -> JobResult<Vec<RecurringSchedule>> {
        Ok(self.state.lock().schedules.values().cloned().collect())
    }

    async fn advance_schedule(&self, id: &str, expected: DateTime<Utc>, next: DateTime<Utc>) -> JobResult<bool> {
        let mut state = self.state.lock();
        match state.schedules.get_mut(id) {
            Some(schedule) if schedule.next_run_at == expected => {
                schedule.next_run_at = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn promote_delayed(&self) -> JobResult<u64> {
        Ok(self.state.lock().promote(Utc::now()))
    }

    async fn recover_stalled(&self) -> JobResult<u64> {
        let now = Utc::now();
        let mut state = self.state.lock();

        let stalled: Vec<JobId> = state
            .active
            .iter()
            .filter(|(_, worker)| !state.live_worker(worker, now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stalled {
            state.fail_active(id, STALLED_ERROR, now)?;
        }
        Ok(stalled.len() as u64)
    }

    async fn clean(&self, completed_before: DateTime<Utc>, failed_before: DateTime<Utc>) -> JobResult<u64> {
        let mut state = self.state.lock();
        let before = state.jobs.len();
        state.jobs.retain(|_, job| match (job.status, job.finished_at) {
            (JobStatus::Completed, Some(at)) => at >= completed_before,
            (JobStatus::Failed, Some(at)) => at >= failed_before,
            _ => true,
        });
        Ok((before - state.jobs.len()) as u64)
    }

    async fn health_check(&self) -> JobResult<()> {
        Ok(())
    }
}

/// Lease store held in process memory.
#[derive(Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<HashMap<String, Lease>>,
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(&self, name: &str, holder_id: &str, ttl: Duration) -> PortalResult<bool> {
        let now = Utc::now();
        let mut leases = self.leases.lock();

        if let Some(lease) = leases.get(name) {
            if !lease.is_expired_at(now) && lease.holder_id != holder_id {
                return Ok(false);
            }
        }

        leases.insert(
            name.to_string(),
            Lease {
                name: name.to_string(),
                holder_id: holder_id.to_string(),
                acquired_at: now,
                expires_at: now + ttl_to_chrono(ttl),
            },
        );
        Ok(true)
    }

    async fn renew(&self, name: &str, holder_id: &str, ttl: Duration) -> PortalResult<bool> {
        let mut leases = self.leases.lock();
        match leases.get_mut(name) {
            Some(lease) if lease.holder_id == holder_id => {
                lease.expires_at = Utc::now() + ttl_to_chrono(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, name: &str, holder_id: &str) -> PortalResult<bool> {
        let mut leases = self.leases.lock();
        if leases.get(name).is_some_and(|lease| lease.holder_id == holder_id) {
            leases.remove(name);
            return Ok(true);
        }
        Ok(false)
    }

    async fn current(&self, name: &str) -> PortalResult<Option<Lease>> {
        Ok(self.leases.lock().get(name).cloned())
    }
}
