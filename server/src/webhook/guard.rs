//! Idempotency Guard
//!
//! Deduplicates at-least-once event deliveries by event id. An event is
//! processed at most once for side effects; once a processing record exists,
//! redeliveries short-circuit to a no-op acknowledgement.
//!
//! Guard failures never abort the primary operation. A failing existence
//! check is treated as "not yet processed" so a store outage cannot silently
//! drop legitimate events; a failing record write is logged and the side
//! effect is not retried within the same invocation.

use std::sync::Arc;

use chrono::Utc;

use super::types::{WebhookEventRecord, WebhookEventStatus};
use crate::stores::DocumentStore;

/// Collection holding write-once event records.
pub const WEBHOOK_EVENT_COLLECTION: &str = "webhook_events";

/// Event-id deduplication over the document store.
#[derive(Clone)]
pub struct IdempotencyGuard {
    docs: Arc<dyn DocumentStore>,
}

impl IdempotencyGuard {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    /// Whether a processing record already exists for this event id.
    pub async fn is_processed(&self, event_id: &str) -> bool {
        match self.docs.get(WEBHOOK_EVENT_COLLECTION, event_id).await {
            Ok(record) => record.is_some(),
            Err(e) => {
                // A failed check must not drop the event; proceed as new.
                tracing::warn!(
                    event_id,
                    error = %e,
                    "Idempotency check failed; treating event as unprocessed"
                );
                false
            }
        }
    }

    /// Write the terminal record for an event. Write-once: a concurrent
    /// duplicate losing this race is expected and only logged.
    pub async fn mark_processed(
        &self,
        event_id: &str,
        event_type: &str,
        status: WebhookEventStatus,
        error: Option<&str>,
    ) {
        let record = WebhookEventRecord {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            status,
            error: error.map(ToString::to_string),
            processed_at: Utc::now().to_rfc3339(),
        };

        let data = match serde_json::to_value(&record) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(event_id, error = %e, "Failed to serialize webhook record");
                return;
            }
        };

        if let Err(e) = self
            .docs
            .create(WEBHOOK_EVENT_COLLECTION, event_id, data)
            .await
        {
            tracing::warn!(
                event_id,
                error = %e,
                "Failed to persist webhook processing record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryDocumentStore;

    #[tokio::test]
    async fn second_delivery_is_detected() {
        let docs = Arc::new(MemoryDocumentStore::new());
        let guard = IdempotencyGuard::new(docs);

        assert!(!guard.is_processed("evt_1").await);
        guard
            .mark_processed("evt_1", "customer.deleted", WebhookEventStatus::Success, None)
            .await;
        assert!(guard.is_processed("evt_1").await);
        assert!(!guard.is_processed("evt_2").await);
    }

    #[tokio::test]
    async fn failed_existence_check_means_unprocessed() {
        let docs = Arc::new(MemoryDocumentStore::new());
        docs.fail_collection(WEBHOOK_EVENT_COLLECTION);
        let guard = IdempotencyGuard::new(docs);

        assert!(
            !guard.is_processed("evt_1").await,
            "store outage must not drop the event"
        );
    }

    #[tokio::test]
    async fn mark_processed_is_write_once() {
        let docs = Arc::new(MemoryDocumentStore::new());
        let guard = IdempotencyGuard::new(docs.clone());

        guard
            .mark_processed("evt_1", "customer.deleted", WebhookEventStatus::Success, None)
            .await;
        // Losing the create race is silent; the original record survives.
        guard
            .mark_processed(
                "evt_1",
                "customer.deleted",
                WebhookEventStatus::Failed,
                Some("late duplicate"),
            )
            .await;

        let doc = docs
            .get(WEBHOOK_EVENT_COLLECTION, "evt_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.data["status"], "success");
    }
}
