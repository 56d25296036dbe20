//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

/// Basic health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Readiness response with component checks
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub database: String,
    pub active_workers: usize,
}

/// Basic health check
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Readiness check (is the service ready to accept requests)
pub async fn readiness(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let database = match &state.db_pool {
        Some(pool) => match pool.health_check().await {
            Ok(()) => "healthy",
            Err(_) => "unhealthy",
        },
        None => "memory",
    };

    let ready = database != "unhealthy";
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "unavailable" }.to_string(),
            database: database.to_string(),
            active_workers: state.scheduler.dispatcher().active_count(),
        }),
    )
}
