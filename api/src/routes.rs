// Router for the webhook gateway

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the application router
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Route for github callbacks
        .route("/webhook-handler/", post(handlers::webhooks::handle_webhook))
        .route("/webhook-handler", post(handlers::webhooks::handle_webhook))
        .route("/health", get(handlers::health::health_check))
        .route("/api/tasks/dead-letter", get(handlers::tasks::list_dead_letters))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
