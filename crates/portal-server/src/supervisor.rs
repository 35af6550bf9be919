//! Leader-gated background processing.
//!
//! Every instance campaigns for the background lease; only the leader runs
//! the worker pool and the scheduler. Losing the lease stops both, gaining
//! it again restarts them with the schedule re-registered from the stored
//! settings. A worker pool or scheduler that fails to start is restarted
//! after a delay for as long as the term lasts.

use portal_jobs::{JobResult, LeaderElector, Scheduler, WorkerPool};
use portal_watchlist::WatchlistJobs;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Default pause before restarting a failed worker pool or scheduler.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Worker pool and scheduler of one leadership term.
struct Term {
    stop_tx: watch::Sender<bool>,
    tasks: [JoinHandle<()>; 2],
}

/// Runs background work while this instance holds the lease.
pub struct BackgroundSupervisor {
    elector: Arc<LeaderElector>,
    pool: WorkerPool,
    scheduler: Arc<Scheduler>,
    jobs: WatchlistJobs,
    restart_delay: Duration,
}

impl BackgroundSupervisor {
    pub fn new(elector: Arc<LeaderElector>, pool: WorkerPool, scheduler: Arc<Scheduler>, jobs: WatchlistJobs) -> Self {
        Self {
            elector,
            pool,
            scheduler,
            jobs,
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }

    #[must_use]
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Campaigns and follows leadership until `shutdown` turns true, then
    /// drains the worker and releases the lease.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut leading = self.elector.subscribe();
        let elector = self.elector.clone();
        let election = tokio::spawn(async move {
            if let Err(e) = elector.run().await {
                error!(error = %e, "Leader election failed");
            }
        });

        let mut term: Option<Term> = None;

        loop {
            tokio::select! {
                changed = leading.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let is_leader = *leading.borrow_and_update();
                    term = match (is_leader, term.take()) {
                        (true, None) => Some(self.start_term().await),
                        (false, Some(active)) => {
                            Self::stop_term(active).await;
                            None
                        }
                        (_, unchanged) => unchanged,
                    };
                }
                () = shutdown_requested(&mut shutdown) => break,
            }
        }

        if let Some(active) = term.take() {
            Self::stop_term(active).await;
        }
        self.elector.stop();
        if let Err(e) = election.await {
            warn!(error = %e, "Leader election task ended abnormally");
        }
        info!("Background processing stopped");
    }

    async fn start_term(&self) -> Term {
        info!("Leadership acquired, starting worker pool and scheduler");

        if let Err(e) = self.jobs.register_schedule().await {
            warn!(error = %e, "Failed to register the watchlist sync schedule");
        }

        let (stop_tx, stop_rx) = watch::channel(false);

        let delay = self.restart_delay;

        let pool = self.pool.clone();
        let mut worker_stop = stop_rx.clone();
        let worker = tokio::spawn(async move {
            loop {
                let outcome = run_until_stopped(pool.start(), || pool.stop(), worker_stop.clone()).await;
                if !restart_after(outcome, "worker pool", delay, &mut worker_stop).await {
                    break;
                }
            }
        });

        let scheduler = self.scheduler.clone();
        let mut scheduler_stop = stop_rx;
        let scheduler_task = tokio::spawn(async move {
            loop {
                let outcome = run_until_stopped(scheduler.run(), || scheduler.stop(), scheduler_stop.clone()).await;
                if !restart_after(outcome, "scheduler", delay, &mut scheduler_stop).await {
                    break;
                }
            }
        });

        Term {
            stop_tx,
            tasks: [worker, scheduler_task],
        }
    }

    async fn stop_term(term: Term) {
        info!("Stopping worker pool and scheduler");
        term.stop_tx.send_replace(true);
        for task in term.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
    }
}

/// Drives `work` until `stopped` turns true, then calls `stop` and waits
/// for `work` to wind down. `work` is polled first so that it has
/// subscribed to its own shutdown signal before `stop` can fire.
///
/// Returns the error of `work` if it failed before being stopped.
async fn run_until_stopped<F>(work: F, stop: impl FnOnce(), mut stopped: watch::Receiver<bool>) -> JobResult<()>
where
    F: Future<Output = JobResult<()>>,
{
    tokio::pin!(work);

    tokio::select! {
        biased;
        result = &mut work => return result,
        () = shutdown_requested(&mut stopped) => {}
    }

    stop();
    if let Err(e) = work.await {
        error!(error = %e, "Background task failed during shutdown");
    }
    Ok(())
}

/// Resolves once `signal` turns true. The `watch::Ref` is dropped here so
/// it is never held across an await in the caller.
async fn shutdown_requested(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|stop| *stop).await;
}

/// Decides whether a finished background task runs again. A failed run is
/// restarted once `delay` has passed, unless the term stops first.
async fn restart_after(
    outcome: JobResult<()>,
    task: &str,
    delay: Duration,
    stopped: &mut watch::Receiver<bool>,
) -> bool {
    let Err(e) = outcome else {
        return false;
    };
    error!(task, error = %e, retry_in = ?delay, "Background task failed, restarting");
    let stop_requested = tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        () = shutdown_requested(stopped) => true,
    };
    !stop_requested && !*stopped.borrow()
}
