//! Workflow executor callbacks

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use wablast_core::campaign::ItemStatusReport;
use wablast_storage::models::{CampaignCounters, CampaignItem};

use crate::error::{api_error, ApiError};
use crate::state::AppState;

/// Request body for a counter increment
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IncrementCountersRequest {
    #[serde(default)]
    pub increment_sent: i32,
    #[serde(default)]
    pub increment_failed: i32,
}

/// Report the terminal status of one item
///
/// PATCH /api/v1/executor/items/:item_id/status
pub async fn update_item_status(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<Uuid>,
    Json(report): Json<ItemStatusReport>,
) -> Result<Json<CampaignItem>, ApiError> {
    let item = state
        .service
        .update_item_status(item_id, report)
        .await
        .map_err(api_error)?;

    Ok(Json(item))
}

/// Add to the sent and failed counters of a campaign
///
/// POST /api/v1/executor/campaigns/:campaign_id/counters
pub async fn increment_counters(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<Uuid>,
    Json(req): Json<IncrementCountersRequest>,
) -> Result<Json<CampaignCounters>, ApiError> {
    let counters = state
        .service
        .increment_counters(campaign_id, req.increment_sent, req.increment_failed)
        .await
        .map_err(api_error)?;

    Ok(Json(counters))
}
