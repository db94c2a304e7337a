// Task state store: Redis-backed records, dead-letter list, and webhook
// delivery deduplication

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::errors::StorageError;
use crate::models::TaskRecord;

const TASK_KEY_PREFIX: &str = "release-bot:task:";
const TASK_BY_KEY_PREFIX: &str = "release-bot:task-key:";
const DELIVERY_KEY_PREFIX: &str = "release-bot:delivery:";
const DEAD_LETTER_LIST: &str = "release-bot:dead-letter";
const DEAD_LETTER_MAX_LEN: isize = 1000;

/// Redis connection pool wrapper
#[derive(Clone)]
pub struct RedisPool {
    manager: ConnectionManager,
}

impl RedisPool {
    #[instrument(skip(config), fields(redis_url = %config.url))]
    pub async fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        info!("Initializing Redis connection pool");

        let client = Client::open(config.url.as_str()).map_err(|e| {
            StorageError::ConnectionFailed(format!("Failed to create Redis client: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            StorageError::ConnectionFailed(format!("Failed to create connection manager: {}", e))
        })?;

        Ok(Self { manager })
    }

    pub fn get_connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), StorageError> {
        let mut conn = self.get_connection();

        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::RedisError(format!("Health check failed: {}", e)))?;

        if response != "PONG" {
            return Err(StorageError::RedisError(format!(
                "Unexpected PING response: {}",
                response
            )));
        }

        Ok(())
    }
}

/// Store for task execution state.
///
/// Fills the result-backend role of the broker: workers record status
/// transitions here, the API reads them back, and webhook deliveries are
/// deduplicated by delivery id.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist the current state of a task record
    async fn put(&self, record: &TaskRecord) -> Result<(), StorageError>;

    /// Fetch a record by task id
    async fn get(&self, task_id: Uuid) -> Result<Option<TaskRecord>, StorageError>;

    /// Fetch the most recent record for an idempotency key
    async fn get_by_key(&self, idempotency_key: &str) -> Result<Option<TaskRecord>, StorageError>;

    /// Append a record to the dead-letter list
    async fn push_dead_letter(&self, record: &TaskRecord) -> Result<(), StorageError>;

    /// Most recent dead-lettered records
    async fn dead_letters(&self, limit: usize) -> Result<Vec<TaskRecord>, StorageError>;

    /// Record a webhook delivery id; returns true the first time it is seen
    async fn mark_delivery_seen(&self, delivery_id: &str) -> Result<bool, StorageError>;

    /// Verify the store is reachable
    async fn health_check(&self) -> Result<(), StorageError>;
}

/// Redis-backed task store
pub struct RedisTaskStore {
    pool: RedisPool,
    ttl: Duration,
}

impl RedisTaskStore {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            ttl: Duration::from_secs(14 * 24 * 3600),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn put(&self, record: &TaskRecord) -> Result<(), StorageError> {
        let mut conn = self.pool.get_connection();
        let payload = serde_json::to_string(record)?;
        let ttl = self.ttl.as_secs();

        let _: () = conn
            .set_ex(
                format!("{}{}", TASK_KEY_PREFIX, record.task_id),
                &payload,
                ttl,
            )
            .await?;
        let _: () = conn
            .set_ex(
                format!("{}{}", TASK_BY_KEY_PREFIX, record.idempotency_key),
                &payload,
                ttl,
            )
            .await?;
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<TaskRecord>, StorageError> {
        let mut conn = self.pool.get_connection();
        let payload: Option<String> = conn.get(format!("{}{}", TASK_KEY_PREFIX, task_id)).await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(StorageError::from))
            .transpose()
    }

    async fn get_by_key(&self, idempotency_key: &str) -> Result<Option<TaskRecord>, StorageError> {
        let mut conn = self.pool.get_connection();
        let payload: Option<String> = conn
            .get(format!("{}{}", TASK_BY_KEY_PREFIX, idempotency_key))
            .await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(StorageError::from))
            .transpose()
    }

    async fn push_dead_letter(&self, record: &TaskRecord) -> Result<(), StorageError> {
        let mut conn = self.pool.get_connection();
        let payload = serde_json::to_string(record)?;

        let _: () = conn.lpush(DEAD_LETTER_LIST, payload).await?;
        let _: () = conn.ltrim(DEAD_LETTER_LIST, 0, DEAD_LETTER_MAX_LEN - 1).await?;
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<TaskRecord>, StorageError> {
        let mut conn = self.pool.get_connection();
        let payloads: Vec<String> = conn
            .lrange(DEAD_LETTER_LIST, 0, limit.saturating_sub(1) as isize)
            .await?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(StorageError::from))
            .collect()
    }

    async fn mark_delivery_seen(&self, delivery_id: &str) -> Result<bool, StorageError> {
        let mut conn = self.pool.get_connection();

        // SET NX EX: only the first writer for a delivery id wins
        let result: Option<String> = redis::cmd("SET")
            .arg(format!("{}{}", DELIVERY_KEY_PREFIX, delivery_id))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs())
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        self.pool.health_check().await
    }
}

/// In-memory task store for tests and dry runs
#[derive(Default)]
pub struct MemoryTaskStore {
    records: Mutex<HashMap<Uuid, TaskRecord>>,
    by_key: Mutex<HashMap<String, TaskRecord>>,
    dead_letters: Mutex<Vec<TaskRecord>>,
    deliveries: Mutex<std::collections::HashSet<String>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn put(&self, record: &TaskRecord) -> Result<(), StorageError> {
        self.records
            .lock()
            .expect("store mutex")
            .insert(record.task_id, record.clone());
        self.by_key
            .lock()
            .expect("store mutex")
            .insert(record.idempotency_key.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<TaskRecord>, StorageError> {
        Ok(self.records.lock().expect("store mutex").get(&task_id).cloned())
    }

    async fn get_by_key(&self, idempotency_key: &str) -> Result<Option<TaskRecord>, StorageError> {
        Ok(self
            .by_key
            .lock()
            .expect("store mutex")
            .get(idempotency_key)
            .cloned())
    }

    async fn push_dead_letter(&self, record: &TaskRecord) -> Result<(), StorageError> {
        self.dead_letters
            .lock()
            .expect("store mutex")
            .insert(0, record.clone());
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<TaskRecord>, StorageError> {
        Ok(self
            .dead_letters
            .lock()
            .expect("store mutex")
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_delivery_seen(&self, delivery_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .deliveries
            .lock()
            .expect("store mutex")
            .insert(delivery_id.to_string()))
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
