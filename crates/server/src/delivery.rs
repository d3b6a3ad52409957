use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use steward_core::collaborators::{
    CollaboratorError, DeliveryChannel, DeliveryReceipt, RenderedArtifact,
};
use steward_core::config::DeliveryConfig;
use tracing::{info, warn};

use crate::http::{self, IDEMPOTENCY_KEY_HEADER};

#[derive(Serialize)]
struct DeliveryRequest<'a> {
    to: &'a str,
    from: &'a str,
    file_name: &'a str,
    content_type: &'a str,
    content: String,
    metadata: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct DeliveryResponse {
    reference: String,
    #[serde(default)]
    delivered_at: Option<DateTime<Utc>>,
}

/// Posts rendered documents to an outbound mail webhook as JSON.
pub struct WebhookDeliveryChannel {
    client: Client,
    url: String,
    api_key: Option<SecretString>,
    sender_address: String,
}

impl WebhookDeliveryChannel {
    pub fn new(url: impl Into<String>, config: &DeliveryConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: url.into(),
            api_key: config.api_key.clone(),
            sender_address: config.sender_address.clone(),
        })
    }
}

#[async_trait]
impl DeliveryChannel for WebhookDeliveryChannel {
    async fn deliver(
        &self,
        address: &str,
        artifact: &RenderedArtifact,
        metadata: &BTreeMap<String, String>,
    ) -> Result<DeliveryReceipt, CollaboratorError> {
        let body = DeliveryRequest {
            to: address,
            from: &self.sender_address,
            file_name: &artifact.file_name,
            content_type: &artifact.content_type,
            content: String::from_utf8_lossy(&artifact.bytes).into_owned(),
            metadata,
        };

        let mut request = http::authorize(self.client.post(&self.url), self.api_key.as_ref()).json(&body);
        if let Some(key) = metadata.get("operation_key") {
            request = request.header(IDEMPOTENCY_KEY_HEADER, key);
        }

        let response: DeliveryResponse = http::send_json(request, "delivery webhook").await?;
        if response.reference.trim().is_empty() {
            return Err(CollaboratorError::Decode("delivery webhook returned an empty reference".to_owned()));
        }

        info!(
            event_name = "completion.delivery_accepted",
            draft_id = metadata.get("draft_id").map(String::as_str).unwrap_or("unknown"),
            reference = %response.reference,
            "delivery webhook accepted document"
        );
        Ok(DeliveryReceipt {
            reference: response.reference,
            delivered_at: response.delivered_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Used when no webhook is configured: records the delivery in the log only.
#[derive(Default)]
pub struct LogOnlyDeliveryChannel;

#[async_trait]
impl DeliveryChannel for LogOnlyDeliveryChannel {
    async fn deliver(
        &self,
        address: &str,
        artifact: &RenderedArtifact,
        metadata: &BTreeMap<String, String>,
    ) -> Result<DeliveryReceipt, CollaboratorError> {
        let reference = format!("LOG-{}", uuid::Uuid::new_v4().simple());
        warn!(
            event_name = "completion.delivery_logged",
            draft_id = metadata.get("draft_id").map(String::as_str).unwrap_or("unknown"),
            address,
            file_name = %artifact.file_name,
            bytes = artifact.bytes.len(),
            reference = %reference,
            "no delivery webhook configured; document was not sent anywhere"
        );
        Ok(DeliveryReceipt { reference, delivered_at: Utc::now() })
    }
}
