//! Scheduler trigger

use axum::{extract::State, Json};
use std::sync::Arc;
use wablast_core::PollSummary;

use crate::state::AppState;

/// Run one scheduler pass
///
/// POST /api/v1/dispatch/poll
pub async fn poll(State(state): State<Arc<AppState>>) -> Json<PollSummary> {
    Json(state.scheduler.poll().await)
}
