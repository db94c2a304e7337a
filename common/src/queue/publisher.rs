// Task publisher for the NATS JetStream broker

use crate::errors::QueueError;
use crate::models::TaskMessage;
use crate::queue::nats::NatsClient;
use async_nats::jetstream::context::PublishAckFuture;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// TaskPublisher trait for enqueueing release tasks
#[async_trait::async_trait]
pub trait TaskPublisher: Send + Sync {
    /// Publish a task to the broker
    async fn publish(&self, message: &TaskMessage) -> Result<(), QueueError>;

    /// Publish with bounded retry on transient broker failures
    async fn publish_with_retry(
        &self,
        message: &TaskMessage,
        max_retries: u32,
    ) -> Result<(), QueueError>;
}

/// NATS-based task publisher
pub struct NatsTaskPublisher {
    client: NatsClient,
    subject_prefix: String,
    publish_timeout: Duration,
}

impl NatsTaskPublisher {
    pub fn new(client: NatsClient) -> Self {
        let subject_prefix = format!(
            "releases.{}",
            client.config().stream_name.to_lowercase()
        );
        Self {
            client,
            subject_prefix,
            publish_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    fn subject_for(&self, message: &TaskMessage) -> String {
        format!("{}.{}", self.subject_prefix, message.task.kind())
    }
}

#[async_trait::async_trait]
impl TaskPublisher for NatsTaskPublisher {
    #[instrument(skip(self, message), fields(
        task_id = %message.task_id,
        kind = message.task.kind(),
        idempotency_key = %message.idempotency_key
    ))]
    async fn publish(&self, message: &TaskMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(message).map_err(|e| {
            QueueError::SerializationFailed(format!("Failed to serialize task message: {}", e))
        })?;

        let subject = self.subject_for(message);
        let jetstream = self.client.jetstream();

        // The Nats-Msg-Id header drives JetStream deduplication: repeated
        // daemon polls or webhook redeliveries collapse into one task.
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", message.idempotency_key.as_str());
        headers.insert("Task-Id", message.task_id.to_string().as_str());
        headers.insert("Repository", message.repository.full_name().as_str());

        let publish_future: PublishAckFuture = jetstream
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish task: {}", e)))?;

        let ack_result = tokio::time::timeout(self.publish_timeout, publish_future).await;

        match ack_result {
            Ok(Ok(ack)) => {
                if ack.duplicate {
                    info!(subject = %subject, "Task deduplicated by broker");
                } else {
                    info!(subject = %subject, "Task published");
                }
                Ok(())
            }
            Ok(Err(e)) => Err(QueueError::PublishFailed(format!(
                "Failed to get publish acknowledgment: {}",
                e
            ))),
            Err(_) => Err(QueueError::Timeout(format!(
                "Publish acknowledgment timeout after {:?}",
                self.publish_timeout
            ))),
        }
    }

    #[instrument(skip(self, message), fields(
        task_id = %message.task_id,
        kind = message.task.kind(),
        max_retries = max_retries
    ))]
    async fn publish_with_retry(
        &self,
        message: &TaskMessage,
        max_retries: u32,
    ) -> Result<(), QueueError> {
        let mut attempt = 0;
        let mut last_error = None;

        while attempt <= max_retries {
            match self.publish(message).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    last_error = Some(e);

                    if attempt <= max_retries {
                        let delay = Duration::from_millis(100 * 2_u64.pow(attempt - 1));
                        warn!(
                            attempt = attempt,
                            delay_ms = delay.as_millis(),
                            "Publish failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            QueueError::PublishFailed("Unknown error during publish with retry".to_string())
        }))
    }
}
