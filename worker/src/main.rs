// Release worker binary entry point

use clap::Parser;
use common::config::{Settings, DEFAULT_CONF_FILE};
use common::queue::{BrokerConfig, NatsClient};
use common::store::{RedisPool, RedisTaskStore, TaskStore};
use common::telemetry;
use common::worker::WorkerConsumer;
use std::sync::Arc;
use tracing::{error, info};

/// Release task worker: consumes release tasks from the broker and executes
/// them with retry and dead-letter isolation.
#[derive(Parser, Debug)]
#[command(name = "release-bot-worker", version)]
struct Args {
    /// Path to the bot configuration file
    #[arg(short = 'c', long = "config", env = "CONF_PATH", default_value = DEFAULT_CONF_FILE)]
    config: String,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short = 'l', long = "log-level")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = Settings::load_from_file(&args.config)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration {}: {}", args.config, e))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let log_level = args
        .log_level
        .unwrap_or_else(|| settings.observability.log_level.clone());
    telemetry::init_logging(&log_level, settings.observability.tracing_endpoint.as_deref())?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!(
        config = %args.config,
        repository = %settings.repository.full_name(),
        concurrency = settings.worker.concurrency,
        "Starting release-bot worker"
    );

    let settings = Arc::new(settings);

    // Redis keeps task state and webhook delivery dedup
    let redis_pool = RedisPool::new(&settings.redis).await.map_err(|e| {
        error!(error = %e, "Failed to initialize Redis pool");
        anyhow::anyhow!("Redis initialization error: {}", e)
    })?;
    let store = Arc::new(RedisTaskStore::new(redis_pool)) as Arc<dyn TaskStore>;
    info!("Task store initialized");

    // NATS JetStream delivers the release tasks
    let broker_config = BrokerConfig::from_settings(&settings);
    let nats_client = NatsClient::new(broker_config.clone()).await.map_err(|e| {
        error!(error = %e, "Failed to initialize NATS client");
        anyhow::anyhow!("Broker initialization error: {}", e)
    })?;
    nats_client.initialize_stream().await?;
    info!("Broker stream initialized");

    // One consume loop per concurrency slot, all sharing the durable
    // consumer
    let mut consumers = Vec::new();
    let mut handles = Vec::new();
    for slot in 0..settings.worker.concurrency {
        let client = NatsClient::from_client(nats_client.client().clone(), broker_config.clone());
        let consumer = Arc::new(
            WorkerConsumer::new(client, settings.clone(), store.clone())
                .await
                .map_err(|e| anyhow::anyhow!("Failed to create consumer {}: {}", slot, e))?,
        );
        consumers.push(consumer.clone());

        handles.push(tokio::spawn(async move {
            if let Err(e) = consumer.start().await {
                error!(slot, error = %e, "Consumer stopped with error");
            }
        }));
    }
    info!(consumers = consumers.len(), "Worker consumers started");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to listen for Ctrl+C: {}", e))?;
    info!("Received Ctrl+C signal, initiating graceful shutdown");
    for consumer in &consumers {
        consumer.shutdown();
    }

    futures::future::join_all(handles).await;

    telemetry::shutdown_tracer();
    info!("Worker stopped");
    Ok(())
}
