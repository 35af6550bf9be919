//! Watchlist sync metrics.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use portal_core::{HistoryStatus, SyncStatus};
use std::time::Duration;

/// Metric names.
pub mod names {
    /// Sync runs by overall status.
    pub const SYNC_RUNS_TOTAL: &str = "portal_watchlist_sync_runs_total";
    /// Watchlist items processed by outcome.
    pub const SYNC_ITEMS_TOTAL: &str = "portal_watchlist_sync_items_total";
    /// Items skipped without a downstream call.
    pub const SYNC_ITEMS_SKIPPED_TOTAL: &str = "portal_watchlist_sync_items_skipped_total";
    /// Duration of a single-user sync in seconds.
    pub const SYNC_DURATION_SECONDS: &str = "portal_watchlist_sync_duration_seconds";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::SYNC_RUNS_TOTAL, "Total number of watchlist sync runs");
    describe_counter!(names::SYNC_ITEMS_TOTAL, "Total number of watchlist items processed");
    describe_counter!(
        names::SYNC_ITEMS_SKIPPED_TOTAL,
        "Total number of watchlist items skipped without a request"
    );
    describe_histogram!(names::SYNC_DURATION_SECONDS, "Watchlist sync duration in seconds");
}

/// Sync metrics recorder.
#[derive(Clone)]
pub struct SyncMetrics;

impl SyncMetrics {
    pub fn run_finished(status: SyncStatus, duration: Duration) {
        counter!(names::SYNC_RUNS_TOTAL, "status" => status.as_str()).increment(1);
        histogram!(names::SYNC_DURATION_SECONDS, "status" => status.as_str()).record(duration.as_secs_f64());
    }

    pub fn item_processed(status: HistoryStatus) {
        counter!(names::SYNC_ITEMS_TOTAL, "outcome" => status.as_str()).increment(1);
    }

    pub fn items_skipped(count: u32) {
        counter!(names::SYNC_ITEMS_SKIPPED_TOTAL).increment(u64::from(count));
    }
}
