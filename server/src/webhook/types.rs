//! Webhook Request/Response Types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A parsed event notification from the billing provider.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingEvent {
    /// Provider-assigned event id; the deduplication key.
    pub id: String,
    /// Event type, e.g. `customer.subscription.deleted`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload; shape varies by type.
    #[serde(default)]
    pub data: Value,
}

impl BillingEvent {
    /// Our user id, carried in the event payload metadata.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.data
            .get("metadata")
            .and_then(|m| m.get("user_id"))
            .and_then(Value::as_str)
    }
}

/// Terminal processing status stored per event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookEventStatus {
    Success,
    Failed,
    Skipped,
}

/// Write-once processing record; its existence is the idempotency check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub event_id: String,
    pub event_type: String,
    pub status: WebhookEventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processed_at: String,
}

/// Acknowledgement body returned to the provider.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct WebhookAck {
    /// The delivery reached us and was authenticated.
    pub received: bool,
    /// Side effects were applied by this delivery.
    pub processed: bool,
    /// Why nothing was applied (duplicate, unhandled type, permanent error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WebhookAck {
    #[must_use]
    pub const fn processed() -> Self {
        Self {
            received: true,
            processed: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn skipped(reason: &str) -> Self {
        Self {
            received: true,
            processed: false,
            reason: Some(reason.to_string()),
        }
    }
}
