//! Redis lease store for distributed locks.

use super::scripts::{LEASE_ACQUIRE_SCRIPT, LEASE_RELEASE_SCRIPT, LEASE_RENEW_SCRIPT};
use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use portal_core::{Lease, LeaseStore, PortalResult};
use redis::Script;
use std::collections::HashMap;
use std::time::Duration;

/// Lease store keeping each lease in a hash with a TTL.
#[derive(Clone)]
pub struct RedisLeaseStore {
    pool: Pool,
    prefix: String,
}

impl RedisLeaseStore {
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}:lock:{}", self.prefix, name)
    }

    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    async fn run(&self, script: &str, name: &str, holder_id: &str, ttl: Option<Duration>) -> JobResult<bool> {
        let mut conn = self.conn().await?;
        let script = Script::new(script);
        let mut invocation = script.key(self.key(name));
        invocation.arg(holder_id);
        if let Some(ttl) = ttl {
            invocation
                .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
                .arg(Utc::now().timestamp_millis());
        }
        let result: i32 = invocation.invoke_async(&mut *conn).await?;
        Ok(result == 1)
    }

    async fn read(&self, name: &str) -> JobResult<Option<Lease>> {
        let mut conn = self.conn().await?;
        let key = self.key(name);
        let (hash, pttl): (HashMap<String, String>, i64) = redis::pipe()
            .hgetall(&key)
            .pttl(&key)
            .query_async(&mut *conn)
            .await?;

        let (Some(holder_id), Some(acquired_at)) = (hash.get("holder"), hash.get("acquired_at")) else {
            return Ok(None);
        };
        let acquired_at = acquired_at
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| JobError::Lock(format!("lease {name} has an invalid acquired_at")))?;

        let now = Utc::now();
        Ok(Some(Lease {
            name: name.to_string(),
            holder_id: holder_id.clone(),
            acquired_at,
            expires_at: now + chrono::Duration::milliseconds(pttl.max(0)),
        }))
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn try_acquire(&self, name: &str, holder_id: &str, ttl: Duration) -> PortalResult<bool> {
        Ok(self.run(LEASE_ACQUIRE_SCRIPT, name, holder_id, Some(ttl)).await?)
    }

    async fn renew(&self, name: &str, holder_id: &str, ttl: Duration) -> PortalResult<bool> {
        Ok(self.run(LEASE_RENEW_SCRIPT, name, holder_id, Some(ttl)).await?)
    }

    async fn release(&self, name: &str, holder_id: &str) -> PortalResult<bool> {
        Ok(self.run(LEASE_RELEASE_SCRIPT, name, holder_id, None).await?)
    }

    async fn current(&self, name: &str) -> PortalResult<Option<Lease>> {
        Ok(self.read(name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_key() {
        let pool = deadpool_redis::Config::from_url("redis://127.0.0.1:6379")
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .unwrap();
        let store = RedisLeaseStore::new(pool, "portal");
        assert_eq!(store.key("background-worker"), "portal:lock:background-worker");
    }
}
