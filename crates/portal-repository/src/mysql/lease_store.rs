//! MySQL-backed lease store.
//!
//! All timestamps come from the database clock (`UTC_TIMESTAMP(3)`) so that
//! instances with skewed clocks still agree on expiry.

use crate::DatabasePool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portal_core::{Lease, LeaseStore, PortalResult};
use sqlx::FromRow;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Lease store on the `distributed_locks` table.
#[derive(Clone)]
pub struct MySqlLeaseStore {
    pool: Arc<DatabasePool>,
}

impl MySqlLeaseStore {
    /// Creates a new lease store.
    #[must_use]
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct LeaseRow {
    name: String,
    holder_id: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<LeaseRow> for Lease {
    fn from(row: LeaseRow) -> Self {
        Self {
            name: row.name,
            holder_id: row.holder_id,
            acquired_at: row.acquired_at,
            expires_at: row.expires_at,
        }
    }
}

fn ttl_micros(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_micros()).unwrap_or(i64::MAX)
}

#[async_trait]
impl LeaseStore for MySqlLeaseStore {
    async fn try_acquire(&self, name: &str, holder_id: &str, ttl: Duration) -> PortalResult<bool> {
        let micros = ttl_micros(ttl);

        sqlx::query("DELETE FROM distributed_locks WHERE name = ? AND expires_at <= UTC_TIMESTAMP(3)")
            .bind(name)
            .execute(self.pool.inner())
            .await?;

        // The primary key makes the insert the single point of contention.
        let inserted = sqlx::query(
            r#"
            INSERT IGNORE INTO distributed_locks (name, holder_id, acquired_at, expires_at)
            VALUES (?, ?, UTC_TIMESTAMP(3), DATE_ADD(UTC_TIMESTAMP(3), INTERVAL ? MICROSECOND))
            "#,
        )
        .bind(name)
        .bind(holder_id)
        .bind(micros)
        .execute(self.pool.inner())
        .await?;

        if inserted.rows_affected() == 1 {
            debug!(lock = name, holder = holder_id, "Lease acquired");
            return Ok(true);
        }

        let reacquired = sqlx::query(
            r#"
            UPDATE distributed_locks
            SET expires_at = DATE_ADD(UTC_TIMESTAMP(3), INTERVAL ? MICROSECOND)
            WHERE name = ? AND holder_id = ?
            "#,
        )
        .bind(micros)
        .bind(name)
        .bind(holder_id)
        .execute(self.pool.inner())
        .await?;

        Ok(reacquired.rows_affected() > 0)
    }

    async fn renew(&self, name: &str, holder_id: &str, ttl: Duration) -> PortalResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE distributed_locks
            SET expires_at = DATE_ADD(UTC_TIMESTAMP(3), INTERVAL ? MICROSECOND)
            WHERE name = ? AND holder_id = ?
            "#,
        )
        .bind(ttl_micros(ttl))
        .bind(name)
        .bind(holder_id)
        .execute(self.pool.inner())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, name: &str, holder_id: &str) -> PortalResult<bool> {
        let result = sqlx::query("DELETE FROM distributed_locks WHERE name = ? AND holder_id = ?")
            .bind(name)
            .bind(holder_id)
            .execute(self.pool.inner())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn current(&self, name: &str) -> PortalResult<Option<Lease>> {
        let row = sqlx::query_as::<_, LeaseRow>(
            "SELECT name, holder_id, acquired_at, expires_at FROM distributed_locks WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(self.pool.inner())
        .await?;

        Ok(row.map(Lease::from))
    }
}
