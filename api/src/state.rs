// Shared application state for the webhook gateway

use std::sync::Arc;

use common::config::Settings;
use common::queue::{NatsClient, TaskPublisher};
use common::rate_limit::RateLimiter;
use common::store::TaskStore;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub publisher: Arc<dyn TaskPublisher>,
    pub store: Arc<dyn TaskStore>,
    /// None when rate limiting is unavailable (tests, degraded Redis)
    pub rate_limiter: Option<Arc<RateLimiter>>,
    /// None when the broker health check is not wired (tests)
    pub broker: Option<Arc<NatsClient>>,
}

impl AppState {
    pub fn new(
        config: Arc<Settings>,
        publisher: Arc<dyn TaskPublisher>,
        store: Arc<dyn TaskStore>,
        rate_limiter: Option<Arc<RateLimiter>>,
        broker: Option<Arc<NatsClient>>,
    ) -> Self {
        Self {
            config,
            publisher,
            store,
            rate_limiter,
            broker,
        }
    }
}
