//! Webhook HTTP Handlers

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::signing::verify_signature;
use super::types::{BillingEvent, WebhookAck, WebhookEventStatus};
use crate::api::AppState;
use crate::audit::MutationRecord;
use crate::stores::StoreError;

/// Header carrying the provider's hex HMAC-SHA256 payload signature.
const SIGNATURE_HEADER: &str = "x-billing-signature";

/// Outcome of dispatching one event's side effects.
enum Dispatch {
    Applied,
    Skipped(String),
    /// Permanent failure: acknowledged so the provider stops retrying.
    Permanent(String),
    /// Transient failure: respond 500 so the provider redelivers.
    Transient(String),
}

/// Receive a billing provider event.
///
/// Redelivered events are acknowledged without re-applying side effects;
/// the idempotency guard makes processing at-most-once.
#[utoipa::path(
    post,
    path = "/api/webhooks/billing",
    request_body = String,
    responses(
        (status = 200, description = "Event received", body = WebhookAck),
        (status = 400, description = "Signature verification failed"),
        (status = 500, description = "Transient failure, retry expected"),
    )
)]
pub async fn receive_billing_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    if !verify_signature(&state.config.webhook_signing_secret, &body, signature) {
        tracing::warn!("Billing webhook rejected: bad signature");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid signature" })),
        )
            .into_response();
    }

    let event: BillingEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            // Authenticated but unparseable: permanent, retrying cannot help.
            tracing::warn!(error = %e, "Billing webhook payload unparseable");
            return Json(WebhookAck::skipped("unparseable payload")).into_response();
        }
    };

    if state.idempotency.is_processed(&event.id).await {
        tracing::debug!(event_id = %event.id, "Duplicate webhook delivery skipped");
        return Json(WebhookAck::skipped("duplicate delivery")).into_response();
    }

    match dispatch(&state, &event).await {
        Dispatch::Applied => {
            state
                .idempotency
                .mark_processed(&event.id, &event.event_type, WebhookEventStatus::Success, None)
                .await;
            if let Some(user_id) = event.user_id() {
                state
                    .audit
                    .record(
                        user_id,
                        None,
                        MutationRecord::succeeded(
                            &event.event_type,
                            "billing_event",
                            Some(event.id.clone()),
                        ),
                    )
                    .await;
            }
            Json(WebhookAck::processed()).into_response()
        }
        Dispatch::Skipped(reason) => {
            state
                .idempotency
                .mark_processed(
                    &event.id,
                    &event.event_type,
                    WebhookEventStatus::Skipped,
                    Some(&reason),
                )
                .await;
            Json(WebhookAck::skipped(&reason)).into_response()
        }
        Dispatch::Permanent(error) => {
            tracing::error!(event_id = %event.id, error = %error, "Billing event failed permanently");
            state
                .idempotency
                .mark_processed(
                    &event.id,
                    &event.event_type,
                    WebhookEventStatus::Failed,
                    Some(&error),
                )
                .await;
            Json(WebhookAck::skipped("processing failed")).into_response()
        }
        Dispatch::Transient(error) => {
            // No record is written: the redelivery must get another chance.
            tracing::warn!(event_id = %event.id, error = %error, "Billing event failed transiently");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "received": true, "error": "transient failure" })),
            )
                .into_response()
        }
    }
}

/// Apply one event's side effects to the user document.
async fn dispatch(state: &AppState, event: &BillingEvent) -> Dispatch {
    let patch = match event.event_type.as_str() {
        "customer.subscription.deleted" => json!({ "subscription_status": "cancelled" }),
        "invoice.payment_failed" => json!({ "subscription_status": "past_due" }),
        // The provider forgot this customer; drop our link to it.
        "customer.deleted" => json!({ "billing_customer_id": null }),
        other => return Dispatch::Skipped(format!("unhandled event type {other}")),
    };

    let Some(user_id) = event.user_id() else {
        return Dispatch::Skipped("event carries no user reference".to_string());
    };

    match state.docs.update("users", user_id, patch).await {
        Ok(()) => Dispatch::Applied,
        // The user is already gone (deleted account): nothing to apply.
        Err(StoreError::NotFound(_)) => {
            Dispatch::Skipped(format!("user {user_id} not found"))
        }
        Err(StoreError::Conflict(e)) => Dispatch::Permanent(e),
        Err(StoreError::Backend(e)) => Dispatch::Transient(e),
    }
}
