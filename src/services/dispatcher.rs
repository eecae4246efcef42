use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{FollowUpError, Result};
use crate::models::ContactRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub external_message_id: Option<String>,
}

/// Transport boundary. Any error counts as a failed delivery attempt.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn send(&self, contact: &ContactRef, text: &str) -> Result<DispatchReceipt>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessagePayload {
    pub phone: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub message: String,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    #[serde(alias = "id", alias = "messageId")]
    message_id: Option<String>,
}

/// Posts messages to an HTTP gateway that fronts the real WhatsApp transport.
#[derive(Clone)]
pub struct HttpDispatcher {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpDispatcher {
    pub fn new(url: String, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FollowUpError::Dispatch(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, url, token })
    }
}

#[async_trait]
impl MessageDispatcher for HttpDispatcher {
    async fn send(&self, contact: &ContactRef, text: &str) -> Result<DispatchReceipt> {
        let payload = OutboundMessagePayload {
            phone: contact.phone.clone(),
            name: contact.name.clone(),
            message: text.to_string(),
        };

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                error!("Failed to reach message gateway {}: {}", self.url, err);
                return Err(FollowUpError::Dispatch(format!("Gateway request failed: {}", err)));
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!("Message gateway returned status {} for {}", status, contact.phone);
            return Err(FollowUpError::Dispatch(format!("HTTP {} - {}", status, body)));
        }

        let external_message_id = serde_json::from_str::<GatewayResponse>(&body)
            .ok()
            .and_then(|r| r.message_id);

        info!("Message sent to {} via gateway", contact.phone);

        Ok(DispatchReceipt { external_message_id })
    }
}

/// Logs instead of sending. Used when no gateway is configured.
#[derive(Clone, Default)]
pub struct DryRunDispatcher;

#[async_trait]
impl MessageDispatcher for DryRunDispatcher {
    async fn send(&self, contact: &ContactRef, text: &str) -> Result<DispatchReceipt> {
        info!("[dry-run] message to {}: {}", contact.phone, text);
        Ok(DispatchReceipt {
            external_message_id: Some(format!("dry-run-{}", Uuid::new_v4())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_payload_serialization() {
        let payload = OutboundMessagePayload {
            phone: "+549111".to_string(),
            name: None,
            message: "Hola Ana".to_string(),
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("+549111"));
        assert!(!json.contains("name"));
    }

    #[test]
    fn test_gateway_response_aliases() {
        let a: GatewayResponse = serde_json::from_str(r#"{"messageId": "wamid.1"}"#).unwrap();
        let b: GatewayResponse = serde_json::from_str(r#"{"id": "wamid.2"}"#).unwrap();
        assert_eq!(a.message_id.as_deref(), Some("wamid.1"));
        assert_eq!(b.message_id.as_deref(), Some("wamid.2"));
    }

    #[tokio::test]
    async fn test_dry_run_returns_synthetic_id() {
        let receipt = DryRunDispatcher
            .send(
                &ContactRef {
                    phone: "+549111".to_string(),
                    name: None,
                },
                "hola",
            )
            .await
            .unwrap();

        assert!(receipt.external_message_id.unwrap().starts_with("dry-run-"));
    }
}
