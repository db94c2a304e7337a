// NATS JetStream client for the release task queue

use crate::errors::QueueError;
use async_nats::jetstream::{
    consumer::PullConsumer,
    stream::{Config as StreamConfig, RetentionPolicy, Stream},
    Context as JetStreamContext,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,
    /// Stream name for the release task queue
    pub stream_name: String,
    /// Subject prefix for task messages
    pub subject: String,
    /// Maximum age for messages in the stream (in seconds)
    pub max_age_seconds: u64,
    /// Window in which identical idempotency keys are deduplicated
    pub dedup_window_seconds: u64,
    /// Durable consumer name for workers
    pub consumer_name: String,
    /// Maximum number of delivery attempts before the broker gives up
    pub max_deliver: i64,
    /// How long a worker may hold a task before redelivery (in seconds)
    pub ack_wait_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "RELEASES".to_string(),
            subject: "releases.>".to_string(),
            max_age_seconds: 86400, // 24 hours
            dedup_window_seconds: 600,
            consumer_name: "release-workers".to_string(),
            max_deliver: 10,
            ack_wait_seconds: 900,
        }
    }
}

impl BrokerConfig {
    /// Derive the broker configuration from settings
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            url: settings.nats.url.clone(),
            stream_name: settings.nats.stream_name.clone(),
            consumer_name: settings.nats.consumer_name.clone(),
            max_deliver: i64::from(settings.worker.max_retries.max(1)),
            ack_wait_seconds: settings.worker.timeout_seconds.max(60),
            ..Self::default()
        }
    }
}

/// NATS JetStream client
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: JetStreamContext,
    config: BrokerConfig,
}

impl NatsClient {
    /// Connect to the NATS server
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn new(config: BrokerConfig) -> Result<Self, QueueError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to NATS: {}", e)))?;

        let jetstream = async_nats::jetstream::new(client.clone());

        Ok(Self {
            client,
            jetstream,
            config,
        })
    }

    /// Wrap an existing client (used when the connection is shared)
    pub fn from_client(client: async_nats::Client, config: BrokerConfig) -> Self {
        let jetstream = async_nats::jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            config,
        }
    }

    /// Create or look up the work-queue stream.
    ///
    /// WorkQueue retention deletes each task once a worker acknowledges it;
    /// the duplicate window collapses repeated enqueues of the same
    /// idempotency key.
    #[instrument(skip(self))]
    pub async fn initialize_stream(&self) -> Result<Stream, QueueError> {
        info!(stream_name = %self.config.stream_name, "Initializing JetStream stream");

        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![self.config.subject.clone()],
            retention: RetentionPolicy::WorkQueue,
            max_age: Duration::from_secs(self.config.max_age_seconds),
            duplicate_window: Duration::from_secs(self.config.dedup_window_seconds),
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::StreamCreation(format!("Failed to create stream: {}", e)))?;

        info!(stream_name = %self.config.stream_name, "Stream initialized");
        Ok(stream)
    }

    /// Create or look up the durable worker consumer
    #[instrument(skip(self))]
    pub async fn get_or_create_consumer(&self) -> Result<PullConsumer, QueueError> {
        let stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| QueueError::StreamNotFound(format!("Stream not found: {}", e)))?;

        let consumer_config = async_nats::jetstream::consumer::pull::Config {
            durable_name: Some(self.config.consumer_name.clone()),
            ack_policy: async_nats::jetstream::consumer::AckPolicy::Explicit,
            max_deliver: self.config.max_deliver,
            ack_wait: Duration::from_secs(self.config.ack_wait_seconds),
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(&self.config.consumer_name, consumer_config)
            .await
            .map_err(|e| {
                QueueError::ConsumerCreation(format!("Failed to create consumer: {}", e))
            })?;

        info!(consumer_name = %self.config.consumer_name, "Consumer ready");
        Ok(consumer)
    }

    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Health check: the stream must be reachable
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| QueueError::HealthCheck(format!("Health check failed: {}", e)))?;
        Ok(())
    }
}
