//! Error responses

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::error;
use wablast_core::CampaignError;

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a domain error onto an HTTP error response.
///
/// Persistence failures are logged and reported with a generic message.
pub fn api_error(err: CampaignError) -> ApiError {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = match &err {
        CampaignError::Persistence(detail) => {
            error!("Storage failure: {}", detail);
            "Internal storage error".to_string()
        }
        other => other.to_string(),
    };

    (
        status,
        Json(ErrorResponse {
            error: err.code().to_string(),
            message,
        }),
    )
}
