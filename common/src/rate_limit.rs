// Sliding-window rate limiting for the webhook endpoint

use crate::errors::StorageError;
use crate::store::RedisPool;
use redis::AsyncCommands;
use uuid::Uuid;

/// Redis-backed rate limiter keyed by event source
pub struct RateLimiter {
    pool: RedisPool,
}

impl RateLimiter {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    /// Check whether another request from `source` is allowed.
    ///
    /// Returns Ok(true) when the request fits in the window, Ok(false) when
    /// it should be rejected with 429.
    #[tracing::instrument(skip(self))]
    pub async fn check_rate_limit(
        &self,
        source: &str,
        max_requests: u32,
        window_seconds: u32,
    ) -> Result<bool, StorageError> {
        let mut conn = self.pool.get_connection();

        let key = format!("release-bot:rate-limit:{}", source);
        let now = chrono::Utc::now().timestamp();
        let window_start = now - window_seconds as i64;

        // Sorted set of request timestamps; drop entries outside the window
        let _: () = conn.zrembyscore(&key, 0, window_start).await?;

        let count: u32 = conn.zcard(&key).await?;
        if count >= max_requests {
            tracing::warn!(
                source = %source,
                count = count,
                max_requests = max_requests,
                "Rate limit exceeded"
            );
            return Ok(false);
        }

        let request_id = Uuid::new_v4().to_string();
        let _: () = conn.zadd(&key, request_id, now).await?;
        let _: () = conn.expire(&key, (window_seconds + 60) as i64).await?;

        Ok(true)
    }

    /// Current request count for a source within the window
    #[tracing::instrument(skip(self))]
    pub async fn current_count(
        &self,
        source: &str,
        window_seconds: u32,
    ) -> Result<u32, StorageError> {
        let mut conn = self.pool.get_connection();

        let key = format!("release-bot:rate-limit:{}", source);
        let now = chrono::Utc::now().timestamp();
        let window_start = now - window_seconds as i64;

        let _: () = conn.zrembyscore(&key, 0, window_start).await?;
        let count: u32 = conn.zcard(&key).await?;
        Ok(count)
    }
}
