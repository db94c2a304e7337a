// Worker-side task consumption

mod processor;

pub use processor::TaskProcessor;

use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::Settings;
use crate::errors::QueueError;
use crate::queue::{NatsClient, NatsTaskConsumer, TaskConsumer, TaskHandler};
use crate::retry::{ExponentialBackoff, RetryStrategy};
use crate::store::TaskStore;

/// A worker consumer bound to the release task stream.
///
/// Each instance runs one consume loop; the worker binary spawns one per
/// configured concurrency slot, all sharing the durable consumer.
pub struct WorkerConsumer {
    consumer: NatsTaskConsumer,
}

impl WorkerConsumer {
    #[instrument(skip_all)]
    pub async fn new(
        nats_client: NatsClient,
        settings: Arc<Settings>,
        store: Arc<dyn TaskStore>,
    ) -> Result<Self, QueueError> {
        info!("Creating worker consumer");

        let processor = Arc::new(TaskProcessor::new(settings.clone(), store));
        let retry: Arc<dyn RetryStrategy> =
            Arc::new(ExponentialBackoff::new(settings.worker.max_retries));

        let handler: TaskHandler = Arc::new(move |delivery| {
            let processor = Arc::clone(&processor);
            Box::pin(async move { processor.process(delivery).await })
        });

        let consumer = NatsTaskConsumer::new(nats_client, handler, retry).await?;
        Ok(Self { consumer })
    }

    /// Consume tasks until shutdown is requested
    pub async fn start(&self) -> Result<(), QueueError> {
        self.consumer.start().await
    }

    /// Request graceful shutdown
    pub fn shutdown(&self) {
        self.consumer.shutdown();
    }
}
