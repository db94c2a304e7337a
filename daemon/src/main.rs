// Release daemon binary entry point

use clap::Parser;
use common::bot::ReleaseBot;
use common::config::{Settings, DEFAULT_CONF_FILE};
use common::daemon::{DaemonConfig, DaemonEngine, ReleaseDaemon};
use common::lock::{DistributedLock, RedisLock};
use common::queue::{BrokerConfig, NatsClient, NatsTaskPublisher, TaskPublisher};
use common::store::RedisPool;
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info};

/// Release automation daemon: watches the configured repository for release
/// triggers and enqueues release tasks.
#[derive(Parser, Debug)]
#[command(name = "release-bot-daemon", version)]
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
        "Starting release-bot daemon"
    );

    let settings = Arc::new(settings);

    // Redis backs the poll lock
    let redis_pool = RedisPool::new(&settings.redis).await.map_err(|e| {
        error!(error = %e, "Failed to initialize Redis pool");
        anyhow::anyhow!("Redis initialization error: {}", e)
    })?;
    let lock = Arc::new(RedisLock::new(redis_pool)) as Arc<dyn DistributedLock>;
    info!("Distributed lock initialized");

    // NATS JetStream carries the release tasks
    let broker_config = BrokerConfig::from_settings(&settings);
    let nats_client = NatsClient::new(broker_config).await.map_err(|e| {
        error!(error = %e, "Failed to initialize NATS client");
        anyhow::anyhow!("Broker initialization error: {}", e)
    })?;
    nats_client.initialize_stream().await?;
    let publisher = Arc::new(NatsTaskPublisher::new(nats_client)) as Arc<dyn TaskPublisher>;
    info!("Task publisher initialized");

    let bot = ReleaseBot::new(settings.clone()).await.map_err(|e| {
        error!(error = %e, "Failed to initialize release workflow");
        anyhow::anyhow!("Release workflow initialization error: {}", e)
    })?;

    let engine = Arc::new(DaemonEngine::new(
        DaemonConfig::from_settings(&settings),
        settings.clone(),
        bot,
        lock,
        publisher,
    ));

    let engine_for_shutdown = engine.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        if let Err(e) = engine_for_shutdown.stop().await {
            error!(error = %e, "Error during daemon shutdown");
        }
    });

    info!("Starting trigger evaluation loop");
    if let Err(e) = engine.start().await {
        error!(error = %e, "Daemon error");
        return Err(anyhow::anyhow!("{}", e));
    }

    telemetry::shutdown_tracer();
    info!("Daemon stopped");
    Ok(())
}
