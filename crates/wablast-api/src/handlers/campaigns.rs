//! Campaign handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use wablast_core::campaign::CreateCampaignRequest;
use wablast_storage::models::{Campaign, ScheduleLogEntry};

use crate::error::{api_error, ApiError};
use crate::state::AppState;

/// Campaign with its progress
#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub progress_percentage: f64,
}

impl From<Campaign> for CampaignResponse {
    fn from(campaign: Campaign) -> Self {
        Self {
            progress_percentage: campaign.progress_percentage(),
            campaign,
        }
    }
}

/// Response for a created campaign
#[derive(Debug, Serialize)]
pub struct CreateCampaignResponse {
    pub campaign: CampaignResponse,
    /// Submitted entries that are not valid recipient addresses
    pub rejected_recipients: Vec<String>,
}

/// Request body for pausing a campaign
#[derive(Debug, Default, Deserialize)]
pub struct PauseCampaignRequest {
    pub until: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

/// Request body for resume and cancel
#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

/// Create a campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CreateCampaignResponse>), ApiError> {
    let created = state
        .service
        .create_campaign(tenant_id, req)
        .await
        .map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateCampaignResponse {
            campaign: CampaignResponse::from(created.campaign),
            rejected_recipients: created.rejected_recipients,
        }),
    ))
}

/// Get a campaign
///
/// GET /api/v1/tenants/:tenant_id/campaigns/:campaign_id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let campaign = state
        .service
        .get_campaign(tenant_id, campaign_id)
        .await
        .map_err(api_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// List the schedule log of a campaign
///
/// GET /api/v1/tenants/:tenant_id/campaigns/:campaign_id/logs
pub async fn list_campaign_logs(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<ScheduleLogEntry>>, ApiError> {
    let logs = state
        .service
        .list_logs(tenant_id, campaign_id)
        .await
        .map_err(api_error)?;

    Ok(Json(logs))
}

/// Submit a draft campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/schedule
pub async fn schedule_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let campaign = state
        .service
        .schedule_campaign(tenant_id, campaign_id)
        .await
        .map_err(api_error)?;

    info!("Scheduled campaign {} ({})", campaign_id, campaign.status);

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Pause a campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/pause
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<PauseCampaignRequest>>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let Json(req) = body.unwrap_or_default();
    let campaign = state
        .service
        .pause_campaign(tenant_id, campaign_id, req.until, req.reason)
        .await
        .map_err(api_error)?;

    info!("Paused campaign {}", campaign_id);

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Resume a paused campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/resume
pub async fn resume_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<ReasonRequest>>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let Json(req) = body.unwrap_or_default();
    let campaign = state
        .service
        .resume_campaign(tenant_id, campaign_id, req.reason)
        .await
        .map_err(api_error)?;

    info!("Resumed campaign {}", campaign_id);

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Cancel a campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/cancel
pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<ReasonRequest>>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let Json(req) = body.unwrap_or_default();
    let campaign = state
        .service
        .cancel_campaign(tenant_id, campaign_id, req.reason)
        .await
        .map_err(api_error)?;

    info!("Cancelled campaign {}", campaign_id);

    Ok(Json(CampaignResponse::from(campaign)))
}
