use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;

use crate::engine::retry::RetrySummary;
use crate::events::reprocessor::ReprocessSummary;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/retry-unassigned", post(retry_unassigned))
        .route("/admin/reprocess-dead-letters", post(reprocess_dead_letters))
}

async fn retry_unassigned(State(state): State<Arc<AppState>>) -> Json<RetrySummary> {
    let summary = state
        .dispatch
        .retry_unassigned(
            state.config.assignment_max_retries,
            state.config.order_max_age_hours,
        )
        .await;
    Json(summary)
}

async fn reprocess_dead_letters(State(state): State<Arc<AppState>>) -> Json<ReprocessSummary> {
    Json(state.reprocessor.run_once().await)
}
