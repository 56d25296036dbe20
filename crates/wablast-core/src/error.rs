//! Campaign engine errors

use thiserror::Error;
use wablast_storage::models::CampaignStatus;

use crate::gateway::GatewayError;

/// Campaign engine errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Cannot {action} a campaign in '{from}' status")]
    InvalidTransition {
        from: CampaignStatus,
        action: &'static str,
    },

    #[error("Campaign is already finalized ({0})")]
    AlreadyFinalized(CampaignStatus),

    #[error("Campaign is not paused")]
    NotPaused,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl CampaignError {
    pub fn campaign_not_found(id: uuid::Uuid) -> Self {
        CampaignError::NotFound(format!("Campaign {}", id))
    }

    pub fn item_not_found(id: uuid::Uuid) -> Self {
        CampaignError::NotFound(format!("Campaign item {}", id))
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CampaignError::NotFound(_) => 404,
            CampaignError::InvalidTransition { .. } => 409,
            CampaignError::AlreadyFinalized(_) => 409,
            CampaignError::NotPaused => 409,
            CampaignError::Validation(_) => 400,
            CampaignError::Gateway(_) => 502,
            CampaignError::Persistence(_) => 500,
        }
    }

    /// Get error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            CampaignError::NotFound(_) => "not_found",
            CampaignError::InvalidTransition { .. } => "invalid_transition",
            CampaignError::AlreadyFinalized(_) => "already_finalized",
            CampaignError::NotPaused => "not_paused",
            CampaignError::Validation(_) => "validation_error",
            CampaignError::Gateway(_) => "gateway_error",
            CampaignError::Persistence(_) => "persistence_error",
        }
    }
}

impl From<wablast_common::Error> for CampaignError {
    fn from(err: wablast_common::Error) -> Self {
        match err {
            wablast_common::Error::NotFound(what) => CampaignError::NotFound(what),
            wablast_common::Error::Validation(msg) => CampaignError::Validation(msg),
            other => CampaignError::Persistence(other.to_string()),
        }
    }
}

/// Result type for campaign operations
pub type Result<T> = std::result::Result<T, CampaignError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_codes() {
        let err = CampaignError::InvalidTransition {
            from: CampaignStatus::Completed,
            action: "pause",
        };
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.code(), "invalid_transition");
        assert_eq!(err.to_string(), "Cannot pause a campaign in 'completed' status");

        assert_eq!(CampaignError::NotPaused.status_code(), 409);
        assert_eq!(
            CampaignError::Gateway(GatewayError::Transient("busy".into())).status_code(),
            502
        );
    }

    #[test]
    fn test_from_storage_error() {
        let err: CampaignError = wablast_common::Error::Database("connection reset".into()).into();
        assert!(matches!(err, CampaignError::Persistence(_)));
        assert_eq!(err.status_code(), 500);

        let err: CampaignError = wablast_common::Error::Validation("bad".into()).into();
        assert_eq!(err.code(), "validation_error");
    }
}
