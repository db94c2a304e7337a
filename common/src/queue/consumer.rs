// Task consumer for the NATS JetStream broker

use crate::errors::QueueError;
use crate::models::TaskMessage;
use crate::queue::nats::NatsClient;
use crate::retry::RetryStrategy;
use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::{AckKind, Message};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, instrument, warn};

/// A task together with its broker-side delivery attempt (1-based)
#[derive(Debug, Clone)]
pub struct TaskDelivery {
    pub message: TaskMessage,
    pub attempt: u32,
}

/// Callback type for processing task deliveries.
///
/// Returning Ok acknowledges the task (including tasks the handler chose to
/// dead-letter itself); returning Err schedules a redelivery.
pub type TaskHandler = Arc<
    dyn Fn(TaskDelivery) -> futures::future::BoxFuture<'static, Result<(), anyhow::Error>>
        + Send
        + Sync,
>;

/// Task consumer trait
#[async_trait::async_trait]
pub trait TaskConsumer: Send + Sync {
    /// Start consuming tasks; returns when shutdown is requested
    async fn start(&self) -> Result<(), QueueError>;

    /// Request graceful shutdown
    fn shutdown(&self);
}

/// NATS-based task consumer
pub struct NatsTaskConsumer {
    consumer: PullConsumer,
    handler: TaskHandler,
    retry: Arc<dyn RetryStrategy>,
    max_deliver: u32,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl NatsTaskConsumer {
    #[instrument(skip(client, handler, retry))]
    pub async fn new(
        client: NatsClient,
        handler: TaskHandler,
        retry: Arc<dyn RetryStrategy>,
    ) -> Result<Self, QueueError> {
        info!("Creating task consumer");

        let max_deliver = client.config().max_deliver.max(1) as u32;
        let consumer = client.get_or_create_consumer().await?;

        Ok(Self {
            consumer,
            handler,
            retry,
            max_deliver,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        })
    }

    /// Process one delivery: ack on success, NAK with a backoff delay on
    /// retryable failure, terminate delivery when attempts are exhausted
    #[instrument(skip(self, message))]
    async fn process_message(&self, message: Message) -> Result<(), QueueError> {
        let info = message
            .info()
            .map_err(|e| QueueError::ConsumeFailed(format!("Failed to get message info: {}", e)))?;
        let attempt = info.delivered.max(1) as u32;

        let task_message: TaskMessage = serde_json::from_slice(&message.payload).map_err(|e| {
            QueueError::DeserializationFailed(format!("Failed to deserialize task: {}", e))
        })?;

        info!(
            task_id = %task_message.task_id,
            kind = task_message.task.kind(),
            attempt = attempt,
            "Processing task"
        );

        let delivery = TaskDelivery {
            message: task_message.clone(),
            attempt,
        };

        match (self.handler)(delivery).await {
            Ok(()) => {
                message.ack().await.map_err(|e| {
                    QueueError::AckFailed(format!("Failed to acknowledge task: {}", e))
                })?;
                Ok(())
            }
            Err(e) => {
                error!(
                    task_id = %task_message.task_id,
                    attempt = attempt,
                    error = %e,
                    "Task processing failed"
                );

                if attempt >= self.max_deliver {
                    // The handler is expected to dead-letter exhausted tasks
                    // itself; terminating here is the backstop against a
                    // redelivery loop.
                    message.ack_with(AckKind::Term).await.map_err(|e| {
                        QueueError::AckFailed(format!("Failed to terminate delivery: {}", e))
                    })?;
                    warn!(task_id = %task_message.task_id, "Delivery terminated after final attempt");
                } else {
                    let delay = self
                        .retry
                        .next_delay(attempt)
                        .unwrap_or(Duration::from_secs(300));
                    message
                        .ack_with(AckKind::Nak(Some(delay)))
                        .await
                        .map_err(|e| {
                            QueueError::AckFailed(format!("Failed to NAK task: {}", e))
                        })?;
                    warn!(
                        task_id = %task_message.task_id,
                        delay_secs = delay.as_secs(),
                        "Task scheduled for redelivery"
                    );
                }

                Err(QueueError::ConsumeFailed(format!(
                    "Task processing failed: {}",
                    e
                )))
            }
        }
    }
}

#[async_trait::async_trait]
impl TaskConsumer for NatsTaskConsumer {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), QueueError> {
        info!("Starting task consumer");

        let mut messages = self.consumer.messages().await.map_err(|e| {
            QueueError::ConsumeFailed(format!("Failed to create message stream: {}", e))
        })?;

        info!("Consumer started, waiting for tasks");

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping consumer");
                break;
            }

            tokio::select! {
                message_result = messages.next() => {
                    match message_result {
                        Some(Ok(message)) => {
                            if let Err(e) = self.process_message(message).await {
                                error!(error = %e, "Failed to process task");
                                // Keep consuming; the broker redelivers
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Error receiving task");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        None => {
                            warn!("Message stream ended unexpectedly");
                            break;
                        }
                    }
                }
                _ = self.shutdown_notify.notified() => {
                    info!("Shutdown notification received");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    // Loop back to check the shutdown flag
                    continue;
                }
            }
        }

        info!("Consumer stopped gracefully");
        Ok(())
    }

    fn shutdown(&self) {
        info!("Requesting consumer shutdown");
        self.shutdown_flag.store(true, Ordering::Relaxed);
        self.shutdown_notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReleaseTask, Repository};

    #[test]
    fn test_task_delivery_deserialization() {
        let message = TaskMessage::new(
            Repository::new("owner", "project"),
            ReleaseTask::PublishRelease {
                version: "1.0.0".to_string(),
                pr_number: 9,
            },
        );

        let bytes = serde_json::to_vec(&message).unwrap();
        let decoded: TaskMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.task.kind(), "publish_release");
    }

    #[tokio::test]
    async fn test_shutdown_flag() {
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        assert!(!shutdown_flag.load(Ordering::Relaxed));

        shutdown_flag.store(true, Ordering::Relaxed);
        assert!(shutdown_flag.load(Ordering::Relaxed));
    }
}
