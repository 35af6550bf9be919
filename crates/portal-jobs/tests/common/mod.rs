//! Common test infrastructure for Redis integration tests.

#![allow(dead_code)]

use deadpool_redis::Pool;
use portal_config::RedisConfig;
use portal_jobs::{create_pool, QueueDefaults, RedisJobQueue, RedisLeaseStore};
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::Redis;
use uuid::Uuid;

/// Redis testcontainer with a connected pool.
pub struct TestRedis {
    _container: ContainerAsync<Redis>,
    pool: Pool,
}

impl TestRedis {
    /// Starts a fresh Redis container.
    pub async fn new() -> Self {
        let container = Redis::default()
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let config = RedisConfig {
            url: Some(format!("redis://127.0.0.1:{}", port)),
            pool_size: 4,
        };
        let pool = create_pool(&config).await.expect("Failed to connect to Redis");

        Self {
            _container: container,
            pool,
        }
    }

    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    /// Queue under a fresh key prefix.
    pub fn queue(&self) -> RedisJobQueue {
        self.queue_with(QueueDefaults::default())
    }

    pub fn queue_with(&self, defaults: QueueDefaults) -> RedisJobQueue {
        RedisJobQueue::new(self.pool(), format!("test:{}", Uuid::new_v4()), defaults)
    }

    pub fn lease_store(&self) -> RedisLeaseStore {
        RedisLeaseStore::new(self.pool(), format!("test:{}", Uuid::new_v4()))
    }
}
