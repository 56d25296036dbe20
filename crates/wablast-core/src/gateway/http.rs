//! HTTP gateway client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;
use wablast_common::config::GatewayConfig;
use wablast_common::{Error, Result};
use wablast_storage::models::MessagePayload;

use super::{GatewayError, GatewayReceipt, MessageGateway};

/// Longest slice of an error body kept in the item's error message
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    number: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    buttons: Option<&'a serde_json::Value>,
}

/// Gateway reached over HTTP/JSON
pub struct HttpGateway {
    client: Client,
    base_url: String,
    send_path: String,
    api_key: Option<String>,
}

impl HttpGateway {
    /// Create a gateway client from configuration
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            send_path: config.send_path.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn send_url(&self, instance_id: &str) -> String {
        let path = self.send_path.replace("{instance}", instance_id);
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

/// 429, 408 and 5xx are worth retrying; any other rejection is final
fn classify(status: StatusCode, body: &str) -> GatewayError {
    let mut body = body.trim().to_string();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    let message = if body.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), body)
    };

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        GatewayError::Transient(message)
    } else {
        GatewayError::Permanent(message)
    }
}

fn provider_message_id(body: &serde_json::Value) -> Option<String> {
    body.pointer("/key/id")
        .or_else(|| body.get("id"))
        .or_else(|| body.get("messageId"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[async_trait]
impl MessageGateway for HttpGateway {
    async fn send(
        &self,
        recipient: &str,
        payload: &MessagePayload,
    ) -> std::result::Result<GatewayReceipt, GatewayError> {
        let url = self.send_url(&payload.instance_id);
        let body = SendRequest {
            number: recipient,
            text: &payload.message,
            media_url: payload.media_url.as_deref(),
            buttons: payload.buttons.as_ref(),
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.header("apikey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify(status, &text));
        }

        // A success with an unreadable body still counts as sent
        let response: Option<serde_json::Value> = response.json().await.ok();
        let receipt = GatewayReceipt {
            provider_message_id: response.as_ref().and_then(provider_message_id),
            response,
        };

        debug!(
            recipient = %recipient,
            provider_message_id = ?receipt.provider_message_id,
            "Gateway accepted message"
        );
        Ok(receipt)
    }
}
