//! Message gateway - the external WhatsApp-compatible sending API

mod http;

pub use http::HttpGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wablast_storage::models::MessagePayload;

/// Gateway send failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Worth retrying later (rate limited, upstream down, network)
    #[error("transient: {0}")]
    Transient(String),

    /// The request itself was rejected
    #[error("permanent: {0}")]
    Permanent(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }

    /// Raw error text as reported by the gateway
    pub fn message(&self) -> &str {
        match self {
            GatewayError::Transient(msg) | GatewayError::Permanent(msg) => msg,
        }
    }
}

/// Successful send acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayReceipt {
    pub provider_message_id: Option<String>,
    /// Raw response body, stored on the item
    pub response: Option<serde_json::Value>,
}

/// Sends one message to one recipient
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        payload: &MessagePayload,
    ) -> Result<GatewayReceipt, GatewayError>;
}
