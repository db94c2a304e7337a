// GitHub webhook intake: validate, deduplicate, enqueue

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde_json::json;
use uuid::Uuid;

use common::models::{ReleaseTask, Repository, TaskMessage};
use common::webhook::validate_signature;

use crate::handlers::ErrorResponse;
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const DELIVERY_HEADER: &str = "x-github-delivery";
const EVENT_HEADER: &str = "x-github-event";

/// Requests allowed per source in a one-minute window
const RATE_LIMIT_MAX_REQUESTS: u32 = 120;
const RATE_LIMIT_WINDOW_SECONDS: u32 = 60;

/// Handle a GitHub webhook callback.
///
/// The payload is not interpreted here beyond being JSON; classification
/// happens in the worker, so a slow release never blocks the gateway.
#[tracing::instrument(skip(state, headers, body))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ErrorResponse> {
    tracing::info!("New github webhook call detected");

    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    // Rate limit by event type; a webhook storm must not flood the broker
    if let Some(rate_limiter) = &state.rate_limiter {
        let allowed = rate_limiter
            .check_rate_limit(event, RATE_LIMIT_MAX_REQUESTS, RATE_LIMIT_WINDOW_SECONDS)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Rate limiter unavailable, allowing request");
                true
            });
        if !allowed {
            return Err(ErrorResponse::new(
                "rate_limit_exceeded",
                "Too many webhook deliveries",
            ));
        }
    }

    // Signature validation when a shared secret is configured
    if let Some(secret) = &state.config.github.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::warn!("Webhook is missing its signature header");
                ErrorResponse::new("unauthorized", "Missing webhook signature")
            })?;

        validate_signature(&body, signature, secret).map_err(|_| {
            tracing::warn!("Webhook signature validation failed");
            ErrorResponse::new("unauthorized", "Invalid webhook signature")
        })?;
    }

    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|_| {
        tracing::error!("This webhook doesn't contain JSON");
        ErrorResponse::new("not_json", "Webhook payload must be JSON")
    })?;

    let delivery_id = headers
        .get(DELIVERY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let repository = Repository::new(
        state.config.repository.owner.clone(),
        state.config.repository.name.clone(),
    );
    let message = TaskMessage::new(
        repository,
        ReleaseTask::ProcessWebhook {
            delivery_id: delivery_id.clone(),
            payload,
        },
    );

    state
        .publisher
        .publish_with_retry(&message, 3)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to enqueue webhook task");
            ErrorResponse::new("broker_unavailable", "Failed to enqueue webhook task")
        })?;

    common::telemetry::record_task_enqueued(message.task.kind());
    tracing::info!(
        task_id = %message.task_id,
        delivery_id = %delivery_id,
        event = event,
        "Webhook task enqueued"
    );

    Ok(Json(json!({ "status": 200 })))
}
