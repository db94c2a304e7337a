// Health endpoint reporting store and broker connectivity

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_healthy = state.store.health_check().await.is_ok();

    let broker_healthy = match &state.broker {
        Some(broker) => broker.health_check().await.is_ok(),
        None => true,
    };

    let healthy = store_healthy && broker_healthy;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "components": {
                "store": if store_healthy { "up" } else { "down" },
                "broker": if broker_healthy { "up" } else { "down" },
            }
        })),
    )
}
