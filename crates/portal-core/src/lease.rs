//! Lease storage abstraction for distributed locks.
//!
//! A lease is a named record with a holder and an expiry. Implementations
//! must make [`LeaseStore::try_acquire`] a single atomic conditional write:
//! it succeeds only when no record exists, the record has expired, or the
//! caller already holds it.

use crate::PortalResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of a lease record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub name: String,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Returns true once the expiry has passed.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Persistence for TTL leases.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Atomically claims `name` for `holder_id` for `ttl`.
    ///
    /// Returns `false` when another holder owns an unexpired lease. That is
    /// not an error: it means another instance is active.
    async fn try_acquire(&self, name: &str, holder_id: &str, ttl: Duration) -> PortalResult<bool>;

    /// Extends the lease only if `holder_id` still owns it.
    async fn renew(&self, name: &str, holder_id: &str, ttl: Duration) -> PortalResult<bool>;

    /// Deletes the lease only if `holder_id` owns it. No-op otherwise.
    async fn release(&self, name: &str, holder_id: &str) -> PortalResult<bool>;

    /// Reads the current lease record, expired or not.
    async fn current(&self, name: &str) -> PortalResult<Option<Lease>>;
}

/// Converts a std duration into a chrono duration, saturating on overflow.
#[must_use]
pub fn ttl_to_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        let lease = Lease {
            name: "background-worker".to_string(),
            holder_id: "a".to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(30),
        };
        assert!(!lease.is_expired_at(now));
        assert!(lease.is_expired_at(now + chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_ttl_to_chrono() {
        assert_eq!(ttl_to_chrono(Duration::from_secs(30)), chrono::Duration::seconds(30));
    }
}
