//! Deletion Scheduler
//!
//! Creates deletion requests, either executing immediately or scheduling
//! them behind the grace period, and runs the background sweep that picks
//! up expired schedules. Concurrent sweeps racing on the same request are
//! serialized by an atomic `scheduled → processing` transition: exactly one
//! writer wins, the loser exits without side effects.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use super::error::DeletionError;
use super::executor;
use super::types::{
    DeletionRequest, DeletionStatus, DeletionStatusResponse, DELETION_REQUEST_COLLECTION,
};
use crate::api::AppState;
use crate::audit::MutationRecord;
use crate::stores::{DocRef, FieldFilter, QueryOptions};

/// How often the sweep looks for expired schedules.
const SWEEP_INTERVAL_SECS: u64 = 900;

/// How often the maintenance pass (export cleanup, code expiry, counter
/// hygiene) runs.
const MAINTENANCE_INTERVAL_SECS: u64 = 3600;

/// Create a deletion request for a user.
///
/// Immediate requests run the purge in line; scheduled ones persist the
/// future trigger, flag the user document, and send a recovery code.
pub async fn schedule_deletion(
    state: &AppState,
    user_id: &str,
    scope: Vec<String>,
    immediate: bool,
    ip_address: Option<&str>,
) -> Result<DeletionStatusResponse, DeletionError> {
    let user_doc = state
        .docs
        .get("users", user_id)
        .await?
        .ok_or_else(|| DeletionError::Validation("User not found".to_string()))?;

    // One live request per user.
    for active_status in [
        DeletionStatus::Pending,
        DeletionStatus::Scheduled,
        DeletionStatus::Processing,
    ] {
        let active = state
            .docs
            .query(
                DELETION_REQUEST_COLLECTION,
                &[
                    FieldFilter::eq("user_id", user_id),
                    FieldFilter::eq("status", active_status.as_str()),
                ],
                QueryOptions::limit(1),
            )
            .await?;
        if !active.is_empty() {
            return Err(DeletionError::AlreadyRequested);
        }
    }

    let now = Utc::now();
    let request_id = Uuid::new_v4().to_string();

    if immediate {
        let request = DeletionRequest {
            user_id: user_id.to_string(),
            scope: scope.clone(),
            status: DeletionStatus::Processing,
            requested_at: now,
            scheduled_deletion_date: None,
            can_recover: false,
            recover_deadline: None,
            certificate_id: None,
            error: None,
        };
        persist_request(state, &request_id, &request).await?;

        state
            .audit
            .record(
                user_id,
                ip_address,
                MutationRecord::succeeded(
                    "deletion_requested_immediate",
                    "deletion_request",
                    Some(request_id.clone()),
                ),
            )
            .await;

        executor::run_deletion(state, &request_id, user_id, &scope).await;

        let completed = state
            .docs
            .get(DELETION_REQUEST_COLLECTION, &request_id)
            .await?
            .ok_or(DeletionError::RequestNotFound)?;
        let request: DeletionRequest = completed.parse()?;
        return Ok(DeletionStatusResponse::from_request(&request_id, &request, Utc::now()));
    }

    let scheduled_for = now + Duration::days(state.config.deletion_grace_days);
    let request = DeletionRequest {
        user_id: user_id.to_string(),
        scope,
        status: DeletionStatus::Scheduled,
        requested_at: now,
        scheduled_deletion_date: Some(scheduled_for),
        can_recover: true,
        recover_deadline: Some(scheduled_for),
        certificate_id: None,
        error: None,
    };
    persist_request(state, &request_id, &request).await?;

    state
        .docs
        .update(
            "users",
            user_id,
            json!({
                "deletion_scheduled_at": scheduled_for.to_rfc3339(),
                "deletion_request_id": request_id,
            }),
        )
        .await?;

    state
        .audit
        .record(
            user_id,
            ip_address,
            MutationRecord::succeeded(
                "deletion_scheduled",
                "deletion_request",
                Some(request_id.clone()),
            )
            .with_values(None, Some(json!({ "scheduled_deletion_date": scheduled_for.to_rfc3339() }))),
        )
        .await;

    // A recovery code goes out with the scheduling notice so cancelling
    // never requires a signed-in session.
    let email = user_doc
        .data
        .get("email")
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string);

    if let Some(address) = email {
        match state
            .recovery
            .issue(user_id, &address, Some(&request_id), ip_address)
            .await
        {
            Ok(issued) => {
                if let Some(email_service) = &state.email {
                    if let Err(e) = email_service
                        .send_deletion_scheduled(
                            &address,
                            &scheduled_for.format("%Y-%m-%d").to_string(),
                            &issued.code,
                        )
                        .await
                    {
                        tracing::warn!(user_id, error = %e, "Failed to send deletion-scheduled email");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to issue recovery code at scheduling");
            }
        }
    }

    tracing::info!(
        user_id,
        request_id,
        scheduled_for = %scheduled_for,
        "Account deletion scheduled"
    );

    let message = format!(
        "Account scheduled for deletion on {}. You can cancel with your recovery code until then.",
        scheduled_for.format("%Y-%m-%d")
    );
    Ok(DeletionStatusResponse::from_request(&request_id, &request, Utc::now()).with_message(message))
}

async fn persist_request(
    state: &AppState,
    request_id: &str,
    request: &DeletionRequest,
) -> Result<(), DeletionError> {
    let data = serde_json::to_value(request)
        .map_err(|e| DeletionError::Validation(format!("request serialization: {e}")))?;
    state
        .docs
        .create(DELETION_REQUEST_COLLECTION, request_id, data)
        .await?;
    Ok(())
}

/// Requests whose grace period has elapsed and that are still `scheduled`.
/// Returns `(request_id, user_id, scope)` triples.
pub async fn find_expired_schedules(
    state: &AppState,
) -> Result<Vec<(String, String, Vec<String>)>, DeletionError> {
    let due = state
        .docs
        .query(
            DELETION_REQUEST_COLLECTION,
            &[
                FieldFilter::eq("status", DeletionStatus::Scheduled.as_str()),
                FieldFilter::before("scheduled_deletion_date", Utc::now()),
            ],
            QueryOptions::default(),
        )
        .await?;

    let mut expired = Vec::with_capacity(due.len());
    for doc in due {
        let request: DeletionRequest = doc.parse()?;
        expired.push((doc.id, request.user_id, request.scope));
    }
    Ok(expired)
}

/// One sweep pass: claim and execute every due request.
///
/// The `scheduled → processing` compare-and-set elects a single writer per
/// request; a concurrent sweep observing the lost race skips the request.
pub async fn run_due_deletions(state: &AppState) {
    let due = match find_expired_schedules(state).await {
        Ok(due) => due,
        Err(e) => {
            tracing::warn!(error = %e, "Deletion sweep query failed");
            return;
        }
    };

    if due.is_empty() {
        return;
    }

    tracing::info!(count = due.len(), "Processing expired deletion schedules");

    for (request_id, user_id, scope) in due {
        let claimed = state
            .docs
            .cas_update(
                DocRef::new(DELETION_REQUEST_COLLECTION, &request_id),
                "status",
                DeletionStatus::Scheduled.as_str(),
                json!({ "status": DeletionStatus::Processing.as_str(), "can_recover": false }),
            )
            .await;

        match claimed {
            Ok(true) => {
                executor::run_deletion(state, &request_id, &user_id, &scope).await;
            }
            Ok(false) => {
                tracing::debug!(request_id, "Lost the claim race; skipping");
            }
            Err(e) => {
                tracing::warn!(request_id, error = %e, "Failed to claim due deletion");
            }
        }
    }
}

/// Spawn the periodic deletion sweep.
///
/// The first tick is consumed immediately so a restart does not trigger a
/// purge burst while the server is still warming up.
pub fn spawn_deletion_sweep_task(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(StdDuration::from_secs(SWEEP_INTERVAL_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            run_due_deletions(&state).await;
        }
    })
}

/// Spawn the hourly maintenance pass: expired export reclamation, recovery
/// code expiry, attempt-counter hygiene. Storage reclamation only; expiry
/// is already enforced lazily on read.
pub fn spawn_maintenance_task(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(StdDuration::from_secs(MAINTENANCE_INTERVAL_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            crate::export::cleanup_expired_exports(&state).await;
            state.recovery.sweep_expired().await;
            state.attempts.cleanup();
        }
    })
}
