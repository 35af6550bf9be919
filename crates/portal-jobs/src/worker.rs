//! Worker pool for processing jobs.
//!
//! One consumer loop per [`JobType`]: jobs of the same type run one at a
//! time, different types run in parallel. Each pool also keeps a heartbeat
//! for stalled-job detection and runs the queue maintenance sweep.

use crate::error::{JobError, JobResult};
use crate::job::{JobContext, JobPayload, JobRecord, JobType};
use crate::metrics::JobMetrics;
use crate::queue::{FailOutcome, JobQueue};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use portal_config::JobsConfig;
use portal_core::ttl_to_chrono;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Executes jobs of one type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs the job. The returned value is stored as the job's result.
    async fn handle(&self, payload: &JobPayload, ctx: JobContext) -> Result<serde_json::Value, JobError>;
}

/// Handler for every job type. Adding a [`JobType`] variant without a
/// handler here fails to compile.
#[derive(Clone)]
pub struct JobHandlers {
    pub sync_user_watchlist: Arc<dyn JobHandler>,
    pub sync_all_due_users: Arc<dyn JobHandler>,
}

impl JobHandlers {
    #[must_use]
    pub fn for_type(&self, job_type: JobType) -> &Arc<dyn JobHandler> {
        match job_type {
            JobType::SyncUserWatchlist => &self.sync_user_watchlist,
            JobType::SyncAllDueUsers => &self.sync_all_due_users,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Idle wait between polls of an empty queue.
    pub poll_interval: Duration,

    /// Job execution timeout.
    pub job_timeout: Duration,

    /// Heartbeat refresh interval.
    pub heartbeat_interval: Duration,

    /// Heartbeat lifetime; jobs of a worker silent for longer are stalled.
    pub heartbeat_ttl: Duration,

    /// Interval of the promote/stalled/clean sweep.
    pub maintenance_interval: Duration,

    pub completed_retention: Duration,
    pub failed_retention: Duration,

    /// Shutdown timeout.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

impl From<&JobsConfig> for WorkerPoolConfig {
    fn from(config: &JobsConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            job_timeout: config.job_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_ttl: config.heartbeat_ttl(),
            maintenance_interval: config.maintenance_interval(),
            completed_retention: config.completed_retention(),
            failed_retention: config.failed_retention(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

/// Worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    /// Unique worker ID, also the heartbeat key.
    id: String,

    queue: Arc<dyn JobQueue>,
    handlers: JobHandlers,
    config: WorkerPoolConfig,

    shutdown_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(queue: Arc<dyn JobQueue>, handlers: JobHandlers, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            id: format!("worker-{}", Uuid::new_v4()),
            queue,
            handlers,
            config,
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
            jobs_processed: Arc::new(AtomicU64::new(0)),
            jobs_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Runs consumers, heartbeat and maintenance until [`WorkerPool::stop`].
    pub async fn start(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Configuration("Worker pool already running".to_string()));
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        if let Err(e) = self.queue.heartbeat(&self.id, self.config.heartbeat_ttl).await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        info!(
            worker_id = %self.id,
            job_types = ?JobType::ALL,
            job_timeout_secs = self.config.job_timeout.as_secs(),
            "Starting worker pool"
        );

        let mut tasks: Vec<JoinHandle<()>> = JobType::ALL
            .into_iter()
            .map(|job_type| tokio::spawn(self.clone().consume(job_type, self.shutdown_tx.subscribe())))
            .collect();
        tasks.push(tokio::spawn(self.clone().heartbeat_loop(self.shutdown_tx.subscribe())));
        tasks.push(tokio::spawn(self.clone().maintenance_loop(self.shutdown_tx.subscribe())));

        let _ = shutdown_rx.recv().await;

        info!(worker_id = %self.id, "Waiting for active jobs to finish...");
        let drained = timeout(
            self.config.shutdown_timeout,
            futures::future::join_all(tasks.iter_mut()),
        )
        .await;
        if drained.is_err() {
            warn!(worker_id = %self.id, "Shutdown timeout reached, aborting worker tasks");
            for task in &tasks {
                task.abort();
            }
        }

        if let Err(e) = self.queue.clear_heartbeat(&self.id).await {
            warn!(worker_id = %self.id, error = %e, "Failed to clear worker heartbeat");
        }
        self.running.store(false, Ordering::SeqCst);

        info!(
            worker_id = %self.id,
            processed = self.jobs_processed(),
            failed = self.jobs_failed(),
            "Worker pool stopped"
        );

        Ok(())
    }

    /// Stop the worker pool. Jobs already running finish first.
    pub fn stop(&self) {
        info!(worker_id = %self.id, "Stopping worker pool...");
        let _ = self.shutdown_tx.send(());
    }

    /// Claims and runs one job of `job_type`. Returns false when nothing
    /// was ready.
    pub async fn process_next(&self, job_type: JobType) -> JobResult<bool> {
        let Some(job) = self.queue.dequeue(job_type, &self.id).await? else {
            return Ok(false);
        };

        let span = info_span!("job", job_id = %job.id, job_type = %job.job_type);
        self.execute(job).instrument(span).await;
        Ok(true)
    }

    /// One maintenance sweep: promote due delayed jobs, recover stalled
    /// jobs, delete expired history and refresh the queue gauges.
    pub async fn run_maintenance(&self) -> JobResult<()> {
        self.queue.promote_delayed().await?;

        let stalled = self.queue.recover_stalled().await?;
        if stalled > 0 {
            JobMetrics::jobs_stalled(stalled);
        }

        let now = Utc::now();
        self.queue
            .clean(
                now - ttl_to_chrono(self.config.completed_retention),
                now - ttl_to_chrono(self.config.failed_retention),
            )
            .await?;

        JobMetrics::update_queue_sizes(&self.queue.stats().await?);
        Ok(())
    }

    async fn execute(&self, job: JobRecord) {
        let ctx = job.context(&self.id);
        let handler = self.handlers.for_type(job.job_type);
        let started = Instant::now();

        debug!(attempt = ctx.attempt, max_attempts = ctx.max_attempts, "Processing job");

        let run = AssertUnwindSafe(handler.handle(&job.payload, ctx)).catch_unwind();
        let result = match timeout(self.config.job_timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(JobError::Handler("job handler panicked".to_string())),
            Err(_) => {
                JobMetrics::job_timed_out(job.job_type);
                Err(JobError::Timeout(self.config.job_timeout))
            }
        };

        match result {
            Ok(value) => {
                if let Err(e) = self.queue.complete(&job.id, value).await {
                    error!(error = %e, "Failed to mark job as complete");
                    return;
                }
                JobMetrics::job_completed(job.job_type, started.elapsed());
                self.jobs_processed.fetch_add(1, Ordering::Relaxed);
                info!(duration_ms = started.elapsed().as_millis(), "Job completed");
            }
            Err(err) => {
                JobMetrics::job_failed(job.job_type, started.elapsed());
                self.jobs_failed.fetch_add(1, Ordering::Relaxed);

                match self.queue.fail(&job.id, &err.to_string()).await {
                    Ok(FailOutcome::Retrying { attempt, run_at }) => {
                        JobMetrics::job_retried(job.job_type, attempt);
                        warn!(error = %err, next_attempt = attempt, run_at = %run_at, "Job failed, retry scheduled");
                    }
                    Ok(FailOutcome::Failed) => {
                        error!(error = %err, attempts = job.attempts, "Job failed permanently");
                    }
                    Err(e) => {
                        error!(error = %e, job_error = %err, "Failed to mark job as failed");
                    }
                }
            }
        }
    }

    async fn consume(self, job_type: JobType, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!(worker_id = %self.id, job_type = %job_type, "Consumer started");

        loop {
            if !matches!(shutdown_rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)) {
                break;
            }

            let idle = match self.process_next(job_type).await {
                Ok(processed) => !processed,
                Err(e) => {
                    error!(job_type = %job_type, error = %e, "Failed to dequeue job");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    () = sleep(self.config.poll_interval) => {}
                }
            }
        }

        debug!(worker_id = %self.id, job_type = %job_type, "Consumer stopped");
    }

    async fn heartbeat_loop(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.heartbeat_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.queue.heartbeat(&self.id, self.config.heartbeat_ttl).await {
                        warn!(worker_id = %self.id, error = %e, "Failed to refresh worker heartbeat");
                    }
                }
            }
        }
    }

    async fn maintenance_loop(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.config.maintenance_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_maintenance().await {
                        error!(error = %e, "Queue maintenance failed");
                    }
                }
            }
        }
    }

    /// Check if the pool is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the number of jobs processed.
    #[must_use]
    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    /// Get the number of failed executions.
    #[must_use]
    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Get the worker ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}
