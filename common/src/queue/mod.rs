// Queue module: NATS JetStream broker for release tasks

pub mod consumer;
pub mod nats;
pub mod publisher;

pub use consumer::{NatsTaskConsumer, TaskConsumer, TaskDelivery, TaskHandler};
pub use nats::{BrokerConfig, NatsClient};
pub use publisher::{NatsTaskPublisher, TaskPublisher};
