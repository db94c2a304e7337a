// Operational task-state endpoints

use axum::{extract::State, Json};

use common::models::TaskRecord;

use crate::handlers::ErrorResponse;
use crate::state::AppState;

const DEAD_LETTER_PAGE: usize = 50;

/// Most recent dead-lettered release tasks, for operator inspection
#[tracing::instrument(skip(state))]
pub async fn list_dead_letters(
    State(state): State<AppState>,
) -> Result<Json<Vec<TaskRecord>>, ErrorResponse> {
    let records = state
        .store
        .dead_letters(DEAD_LETTER_PAGE)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to list dead-lettered tasks");
            ErrorResponse::new("internal_error", "Failed to list dead-lettered tasks")
        })?;

    Ok(Json(records))
}
