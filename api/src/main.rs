// Webhook gateway binary entry point

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

mod handlers;
mod routes;
mod state;

use common::config::{Settings, DEFAULT_CONF_FILE};
use common::queue::{BrokerConfig, NatsClient, NatsTaskPublisher, TaskPublisher};
use common::rate_limit::RateLimiter;
use common::store::{RedisPool, RedisTaskStore, TaskStore};
use common::telemetry;
use state::AppState;

/// Webhook gateway: receives GitHub callbacks and enqueues release tasks.
#[derive(Parser, Debug)]
#[command(name = "release-bot-api", version)]
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

    info!(config = %args.config, "Starting release-bot webhook gateway");

    let settings = Arc::new(settings);

    let redis_pool = RedisPool::new(&settings.redis).await.map_err(|e| {
        error!(error = %e, "Failed to initialize Redis pool");
        anyhow::anyhow!("Redis initialization error: {}", e)
    })?;
    let store = Arc::new(RedisTaskStore::new(redis_pool.clone())) as Arc<dyn TaskStore>;
    let rate_limiter = Arc::new(RateLimiter::new(redis_pool));

    let broker_config = BrokerConfig::from_settings(&settings);
    let nats_client = Arc::new(NatsClient::new(broker_config.clone()).await.map_err(|e| {
        error!(error = %e, "Failed to initialize NATS client");
        anyhow::anyhow!("Broker initialization error: {}", e)
    })?);
    nats_client.initialize_stream().await?;

    let publisher_client =
        NatsClient::from_client(nats_client.client().clone(), broker_config);
    let publisher = Arc::new(NatsTaskPublisher::new(publisher_client)) as Arc<dyn TaskPublisher>;

    let app_state = AppState::new(
        settings.clone(),
        publisher,
        store,
        Some(rate_limiter),
        Some(nats_client),
    );
    let router = routes::create_router(app_state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    info!(addr = %addr, "Webhook gateway listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C signal, shutting down");
        })
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    telemetry::shutdown_tracer();
    info!("Webhook gateway stopped");
    Ok(())
}
