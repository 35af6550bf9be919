//! Leader election over a TTL lease.
//!
//! Every instance runs a [`LeaderElector`]. The holder renews its lease on a
//! fixed interval; the others retry acquisition so that a crashed holder is
//! replaced within one TTL. Background work subscribes to the leadership
//! flag and runs only while it is true.

use crate::error::{JobError, JobResult};
use crate::metrics::LockMetrics;
use portal_config::LockConfig;
use portal_core::LeaseStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Campaigns for a named lease and publishes whether this instance holds it.
pub struct LeaderElector {
    store: Arc<dyn LeaseStore>,
    lock_name: String,
    holder_id: String,
    ttl: Duration,
    renew_interval: Duration,
    retry_interval: Duration,
    leader_tx: watch::Sender<bool>,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
}

impl LeaderElector {
    /// Elector with a random holder id and the configured timings.
    pub fn new(store: Arc<dyn LeaseStore>, config: &LockConfig) -> Self {
        Self::with_timing(
            store,
            config.name.clone(),
            config.ttl(),
            config.renew_interval(),
            config.acquire_retry_interval(),
        )
    }

    pub fn with_timing(
        store: Arc<dyn LeaseStore>,
        lock_name: impl Into<String>,
        ttl: Duration,
        renew_interval: Duration,
        retry_interval: Duration,
    ) -> Self {
        let (leader_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            store,
            lock_name: lock_name.into(),
            holder_id: Uuid::new_v4().to_string(),
            ttl,
            renew_interval,
            retry_interval,
            leader_tx,
            shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    #[must_use]
    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        *self.leader_tx.borrow()
    }

    /// Leadership flag updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.leader_tx.subscribe()
    }

    /// One election step: renew while leading, otherwise try to acquire.
    /// Returns whether this instance leads afterwards.
    pub async fn tick(&self) -> bool {
        let was_leader = self.is_leader();

        let is_leader = if was_leader {
            match self.store.renew(&self.lock_name, &self.holder_id, self.ttl).await {
                Ok(renewed) => renewed,
                Err(e) => {
                    warn!(lock = %self.lock_name, error = %e, "Failed to renew lock, stepping down");
                    false
                }
            }
        } else {
            match self.store.try_acquire(&self.lock_name, &self.holder_id, self.ttl).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    warn!(lock = %self.lock_name, error = %e, "Failed to attempt lock acquisition");
                    false
                }
            }
        };

        match (was_leader, is_leader) {
            (false, true) => {
                info!(lock = %self.lock_name, holder_id = %self.holder_id, "Acquired lock, this instance is now active");
                LockMetrics::lock_acquired(&self.lock_name);
            }
            (true, false) => {
                warn!(lock = %self.lock_name, holder_id = %self.holder_id, "Lost lock, stopping background work");
                LockMetrics::lock_lost(&self.lock_name);
            }
            (false, false) => debug!(lock = %self.lock_name, "Lock held by another instance"),
            (true, true) => debug!(lock = %self.lock_name, "Renewed lock"),
        }

        if was_leader != is_leader {
            self.leader_tx.send_replace(is_leader);
            LockMetrics::update_leader_status(&self.lock_name, is_leader);
        }
        is_leader
    }

    /// Campaigns until [`LeaderElector::stop`], then releases the lease.
    pub async fn run(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Lock("Leader election already running".to_string()));
        }

        info!(
            lock = %self.lock_name,
            holder_id = %self.holder_id,
            ttl_secs = self.ttl.as_secs(),
            "Starting leader election"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            let wait = if self.tick().await {
                self.renew_interval
            } else {
                self.retry_interval
            };

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                () = tokio::time::sleep(wait) => {}
            }
        }

        self.release().await;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Stops campaigning.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Releases the lease if held. Safe to call when not leading.
    pub async fn release(&self) {
        if !self.is_leader() {
            return;
        }

        match self.store.release(&self.lock_name, &self.holder_id).await {
            Ok(true) => info!(lock = %self.lock_name, holder_id = %self.holder_id, "Released lock"),
            Ok(false) => debug!(lock = %self.lock_name, "Lock was no longer held at release"),
            Err(e) => warn!(lock = %self.lock_name, error = %e, "Failed to release lock"),
        }

        self.leader_tx.send_replace(false);
        LockMetrics::update_leader_status(&self.lock_name, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLeaseStore;

    fn elector(store: &Arc<InMemoryLeaseStore>, ttl: Duration) -> LeaderElector {
        LeaderElector::with_timing(
            store.clone(),
            "background-worker",
            ttl,
            Duration::from_millis(20),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn test_only_one_leader() {
        let store = Arc::new(InMemoryLeaseStore::default());
        let a = elector(&store, Duration::from_secs(30));
        let b = elector(&store, Duration::from_secs(30));

        assert!(a.tick().await);
        assert!(!b.tick().await);
        assert!(a.tick().await);
        assert!(a.is_leader());
        assert!(!b.is_leader());
    }

    #[tokio::test]
    async fn test_release_hands_over() {
        let store = Arc::new(InMemoryLeaseStore::default());
        let a = elector(&store, Duration::from_secs(30));
        let b = elector(&store, Duration::from_secs(30));

        a.tick().await;
        a.release().await;
        assert!(!a.is_leader());
        assert!(b.tick().await);
    }

    #[tokio::test]
    async fn test_takeover_after_expiry_and_loss_detected() {
        let store = Arc::new(InMemoryLeaseStore::default());
        let a = elector(&store, Duration::from_millis(30));
        let b = elector(&store, Duration::from_secs(30));

        assert!(a.tick().await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(b.tick().await);

        // The old holder notices on its next renewal.
        assert!(!a.tick().await);
        assert!(!a.is_leader());
    }

    #[tokio::test]
    async fn test_subscribe_sees_transitions() {
        let store = Arc::new(InMemoryLeaseStore::default());
        let a = elector(&store, Duration::from_secs(30));
        let mut rx = a.subscribe();

        a.tick().await;
        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        a.release().await;
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
    }

    #[tokio::test]
    async fn test_run_releases_on_stop() {
        let store = Arc::new(InMemoryLeaseStore::default());
        let a = Arc::new(elector(&store, Duration::from_secs(30)));
        let mut rx = a.subscribe();

        let runner = {
            let a = a.clone();
            tokio::spawn(async move { a.run().await })
        };

        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        a.stop();
        runner.await.unwrap().unwrap();

        assert!(!a.is_leader());
        assert!(store.current("background-worker").await.unwrap().is_none());
    }
}
