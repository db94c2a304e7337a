// Telemetry: structured logging, OTLP tracing, and Prometheus metrics

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "release-bot";

/// Initialize structured JSON logging, optionally with OTLP trace export
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_target(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );

    Ok(())
}

/// Set up the OTLP exporter and global tracer provider
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(endpoint = endpoint, "OpenTelemetry tracer initialized");
    Ok(tracer)
}

/// Flush remaining spans on graceful shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus exporter and describe the release-task metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "release_task_enqueued_total",
        "Total number of release tasks enqueued"
    );
    describe_counter!(
        "release_task_success_total",
        "Total number of successfully executed release tasks"
    );
    describe_counter!(
        "release_task_failed_total",
        "Total number of failed release task attempts"
    );
    describe_counter!(
        "release_task_dead_lettered_total",
        "Total number of release tasks moved to the dead-letter queue"
    );
    describe_histogram!(
        "release_task_duration_seconds",
        "Duration of release task executions in seconds"
    );
    describe_gauge!(
        "release_queue_depth",
        "Current number of tasks waiting in the queue"
    );

    tracing::info!(metrics_port = metrics_port, "Prometheus metrics exporter initialized");
    Ok(())
}

#[inline]
pub fn record_task_enqueued(kind: &str) {
    counter!("release_task_enqueued_total", "kind" => kind.to_string()).increment(1);
}

#[inline]
pub fn record_task_success(kind: &str) {
    counter!("release_task_success_total", "kind" => kind.to_string()).increment(1);
}

#[inline]
pub fn record_task_failure(kind: &str) {
    counter!("release_task_failed_total", "kind" => kind.to_string()).increment(1);
}

#[inline]
pub fn record_task_dead_lettered(kind: &str) {
    counter!("release_task_dead_lettered_total", "kind" => kind.to_string()).increment(1);
}

#[inline]
pub fn record_task_duration(kind: &str, duration_seconds: f64) {
    histogram!("release_task_duration_seconds", "kind" => kind.to_string())
        .record(duration_seconds);
}

#[inline]
pub fn update_queue_depth(depth: i64) {
    gauge!("release_queue_depth").set(depth as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording_does_not_panic() {
        record_task_enqueued("publish_release");
        record_task_success("publish_release");
        record_task_failure("process_webhook");
        record_task_dead_lettered("open_release_pull_request");
        record_task_duration("publish_release", 2.5);
        update_queue_depth(4);
    }

    #[test]
    fn test_init_logging_accepts_valid_levels() {
        // May already be initialized by another test; both outcomes are fine
        let result = init_logging("debug", None);
        assert!(result.is_ok() || result.is_err());
    }
}
