// Distributed locking so only one daemon instance evaluates triggers

use crate::errors::StorageError;
use crate::store::RedisPool;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Distributed lock trait for exclusive access to a resource
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Acquire a lock on the resource with a TTL
    async fn acquire(&self, resource: &str, ttl: Duration) -> Result<LockGuard, StorageError>;
}

/// Lock guard that releases the lock when dropped
pub struct LockGuard {
    resource: String,
    lock_value: String,
    /// None for detached guards (single-instance deployments, tests)
    pool: Option<RedisPool>,
}

impl LockGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    fn detached(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            lock_value: String::new(),
            pool: None,
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(pool) = self.pool.clone() else {
            return;
        };
        let resource = self.resource.clone();
        let lock_value = self.lock_value.clone();

        tokio::spawn(async move {
            if let Err(e) = release_lock(&pool, &resource, &lock_value).await {
                warn!(
                    resource = %resource,
                    error = %e,
                    "Failed to release lock on drop"
                );
            }
        });
    }
}

/// Lock for deployments with a single daemon instance: always grants
pub struct NoopLock;

#[async_trait]
impl DistributedLock for NoopLock {
    async fn acquire(&self, resource: &str, _ttl: Duration) -> Result<LockGuard, StorageError> {
        Ok(LockGuard::detached(resource))
    }
}

/// Redis SET-NX lock with bounded acquisition retries
pub struct RedisLock {
    pool: RedisPool,
    retry_count: u32,
    retry_delay: Duration,
}

impl RedisLock {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            retry_count: 3,
            retry_delay: Duration::from_millis(200),
        }
    }

    pub fn with_retry(pool: RedisPool, retry_count: u32, retry_delay: Duration) -> Self {
        Self {
            pool,
            retry_count,
            retry_delay,
        }
    }

    async fn try_acquire_once(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> Result<LockGuard, StorageError> {
        let mut conn = self.pool.get_connection();
        let key = format!("release-bot:lock:{}", resource);
        let lock_value = Uuid::new_v4().to_string();

        // SET NX EX: atomically claim the key with an expiry
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&lock_value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::RedisError(format!("Failed to acquire lock: {}", e)))?;

        if result.is_some() {
            debug!(resource = %resource, ttl_seconds = ttl.as_secs(), "Lock acquired");
            Ok(LockGuard {
                resource: resource.to_string(),
                lock_value,
                pool: Some(self.pool.clone()),
            })
        } else {
            Err(StorageError::RedisError(format!(
                "Lock already held for resource: {}",
                resource
            )))
        }
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    #[instrument(skip(self), fields(resource = %resource, ttl_seconds = ?ttl.as_secs()))]
    async fn acquire(&self, resource: &str, ttl: Duration) -> Result<LockGuard, StorageError> {
        let mut attempts = 0;

        loop {
            match self.try_acquire_once(resource, ttl).await {
                Ok(guard) => {
                    info!(resource = %resource, attempts = attempts + 1, "Lock acquired");
                    return Ok(guard);
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.retry_count {
                        debug!(resource = %resource, attempts, "Lock unavailable");
                        return Err(e);
                    }
                    sleep(self.retry_delay).await;
                }
            }
        }
    }
}

/// Delete the lock key only when this guard still owns it
async fn release_lock(
    pool: &RedisPool,
    resource: &str,
    lock_value: &str,
) -> Result<(), StorageError> {
    let mut conn = pool.get_connection();
    let key = format!("release-bot:lock:{}", resource);

    let script = r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("del", KEYS[1])
        else
            return 0
        end
    "#;

    let released: i32 = redis::Script::new(script)
        .key(&key)
        .arg(lock_value)
        .invoke_async(&mut conn)
        .await
        .map_err(|e| StorageError::RedisError(format!("Failed to release lock: {}", e)))?;

    if released == 1 {
        debug!(resource = %resource, "Lock released");
    } else {
        warn!(resource = %resource, "Lock was not owned or already expired");
    }

    Ok(())
}
