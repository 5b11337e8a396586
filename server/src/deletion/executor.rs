//! Deletion Executor
//!
//! Performs the cross-system purge for one user, in priority order: the
//! structured document store first (most privacy-critical), then the object
//! store, warehouse, billing processor and identity provider. Each
//! subsystem's outcome is recorded independently; only document-store and
//! identity failures fail the operation as a whole.

use serde_json::json;

use super::certificate;
use super::types::{
    DeletedDataSummary, DeletionResult, DeletionStatus, SubsystemResult,
    DELETION_REQUEST_COLLECTION,
};
use super::verifier;
use crate::api::AppState;
use crate::audit::MutationRecord;
use crate::export::collector::scope_includes;
use crate::stores::{delete_idempotently, DocRef, FieldFilter, QueryOptions, StoreError};

/// Backend batch-write cap for document deletes.
pub const DOCUMENT_BATCH_LIMIT: usize = 500;

/// Query-by-user collections, with the scope domain that covers each.
const SCOPED_COLLECTIONS: [(&str, &str); 2] =
    [("activity", "activity_sessions"), ("consents", "consents")];

/// Purge every in-scope system for one user. Never panics or errors as a
/// whole; all failures land in the returned result.
pub async fn execute(
    state: &AppState,
    user_id: &str,
    request_id: &str,
    scope: &[String],
) -> DeletionResult {
    let mut result = DeletionResult {
        success: false,
        deleted_collections: Vec::new(),
        document_store: SubsystemResult::default(),
        object_store: SubsystemResult::default(),
        warehouse: SubsystemResult::default(),
        billing: SubsystemResult::default(),
        identity_deleted: false,
        certificate_id: None,
        errors: Vec::new(),
    };

    tracing::info!(user_id, request_id, ?scope, "Starting cross-system purge");

    // 1. Structured store - fatal on failure.
    purge_document_store(state, user_id, scope, &mut result).await;

    // 2. Object store - continues past per-file failures, non-fatal.
    purge_object_store(state, user_id, &mut result).await;

    // 3. Warehouse - best-effort, the data is already de-identified.
    purge_warehouse(state, user_id, &mut result).await;

    // 4. Billing - a missing customer is success.
    purge_billing(state, user_id, &mut result).await;

    // 5. Identity provider - fatal on failure, "not found" is success.
    purge_identity(state, user_id, &mut result).await;

    result.success = result.document_store.ok && result.identity_deleted;

    tracing::info!(
        user_id,
        request_id,
        success = result.success,
        documents = result.document_store.removed,
        files = result.object_store.removed,
        warehouse_rows = result.warehouse.removed,
        errors = result.errors.len(),
        "Cross-system purge finished"
    );

    result
}

async fn purge_document_store(
    state: &AppState,
    user_id: &str,
    scope: &[String],
    result: &mut DeletionResult,
) {
    let mut ok = true;

    for (domain, collection) in SCOPED_COLLECTIONS {
        if !scope_includes(scope, domain) {
            continue;
        }
        match purge_collection(state, collection, user_id).await {
            Ok(removed) => {
                result.document_store.removed += removed;
                result.deleted_collections.push(collection.to_string());
            }
            Err(e) => {
                ok = false;
                result
                    .errors
                    .push(format!("document store/{collection}: {e}"));
            }
        }
    }

    // Keyed-by-user documents: settings, then the profile itself, last so
    // in-flight reads of the user's flags keep working during the purge.
    for (domain, collection) in [("settings", "settings"), ("profile", "users")] {
        if !scope_includes(scope, domain) {
            continue;
        }
        match state
            .docs
            .batch_delete(&[DocRef::new(collection, user_id)])
            .await
        {
            Ok(removed) => {
                result.document_store.removed += removed;
                result.deleted_collections.push(collection.to_string());
            }
            Err(e) => {
                ok = false;
                result
                    .errors
                    .push(format!("document store/{collection}: {e}"));
            }
        }
    }

    result.document_store.ok = ok;
}

/// Delete a user's documents from one collection, paging in batches capped
/// by the backend batch-write limit until the query comes back empty.
async fn purge_collection(
    state: &AppState,
    collection: &str,
    user_id: &str,
) -> Result<u64, StoreError> {
    let mut removed = 0u64;
    loop {
        let page = state
            .docs
            .query(
                collection,
                &[FieldFilter::eq("user_id", user_id)],
                QueryOptions::limit(DOCUMENT_BATCH_LIMIT),
            )
            .await?;
        if page.is_empty() {
            break;
        }

        let refs: Vec<DocRef> = page
            .iter()
            .map(|doc| DocRef::new(collection, &doc.id))
            .collect();
        removed += state.docs.batch_delete(&refs).await?;

        if page.len() < DOCUMENT_BATCH_LIMIT {
            break;
        }
    }
    Ok(removed)
}

async fn purge_object_store(state: &AppState, user_id: &str, result: &mut DeletionResult) {
    let Some(objects) = &state.objects else {
        // No object storage configured means no files to remove.
        result.object_store.ok = true;
        return;
    };

    let mut ok = true;
    for prefix in [format!("users/{user_id}/"), format!("exports/{user_id}/")] {
        let files = match objects.list(&prefix).await {
            Ok(files) => files,
            Err(e) => {
                ok = false;
                result.errors.push(format!("object store list {prefix}: {e}"));
                continue;
            }
        };

        for file in files {
            match objects.delete(&file.key).await {
                Ok(()) => result.object_store.removed += 1,
                Err(e) => {
                    // Keep going: one stuck object must not strand the rest.
                    tracing::warn!(key = %file.key, error = %e, "Object delete failed during purge");
                    result.errors.push(format!("object store/{}: {e}", file.key));
                }
            }
        }
    }

    result.object_store.ok = ok;
}

async fn purge_warehouse(state: &AppState, user_id: &str, result: &mut DeletionResult) {
    let user_hash = state.audit.user_hash(user_id);
    match state.warehouse.purge_user(&user_hash).await {
        Ok(rows) => {
            result.warehouse.ok = true;
            result.warehouse.removed = rows;
        }
        // No events table at all: nothing to purge.
        Err(StoreError::NotFound(_)) => {
            result.warehouse.ok = true;
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Warehouse purge failed (non-fatal)");
            result.errors.push(format!("warehouse: {e}"));
        }
    }
}

async fn purge_billing(state: &AppState, user_id: &str, result: &mut DeletionResult) {
    let customer_id = match state.billing.find_customer_id(user_id).await {
        Ok(Some(id)) => id,
        // No billing relationship is success, not failure.
        Ok(None) => {
            result.billing.ok = true;
            return;
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Billing customer lookup failed (non-fatal)");
            result.errors.push(format!("billing lookup: {e}"));
            return;
        }
    };

    match delete_idempotently(|| state.billing.delete_customer(&customer_id)).await {
        Ok(deleted) => {
            result.billing.ok = true;
            result.billing.removed = u64::from(deleted);
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Billing customer delete failed (non-fatal)");
            result.errors.push(format!("billing: {e}"));
        }
    }
}

async fn purge_identity(state: &AppState, user_id: &str, result: &mut DeletionResult) {
    match delete_idempotently(|| state.identity.delete_user(user_id)).await {
        // "Not found" counts: the account being gone is the goal state.
        Ok(_) => result.identity_deleted = true,
        Err(e) => {
            result.errors.push(format!("identity: {e}"));
        }
    }
}

/// Run a purge for a request and finalize the request record: verify,
/// certify and complete on success, or mark failed with the error summary.
///
/// The caller must already have transitioned the request to `processing`.
pub async fn run_deletion(state: &AppState, request_id: &str, user_id: &str, scope: &[String]) {
    // The profile document disappears during the purge; capture the contact
    // address for the completion notice first.
    let email = state
        .docs
        .get("users", user_id)
        .await
        .ok()
        .flatten()
        .and_then(|doc| {
            doc.data
                .get("email")
                .and_then(serde_json::Value::as_str)
                .map(ToString::to_string)
        });

    let mut result = execute(state, user_id, request_id, scope).await;

    if !result.success {
        let summary = result.errors.join("; ");
        if let Err(e) = state
            .docs
            .update(
                DELETION_REQUEST_COLLECTION,
                request_id,
                json!({ "status": DeletionStatus::Failed.as_str(), "error": summary, "can_recover": false }),
            )
            .await
        {
            tracing::error!(request_id, error = %e, "Failed to mark deletion request failed");
        }
        state
            .audit
            .record(
                user_id,
                None,
                MutationRecord::failed(
                    "deletion_failed",
                    "deletion_request",
                    Some(request_id.to_string()),
                    &summary,
                ),
            )
            .await;
        return;
    }

    let verification = verifier::verify(state, user_id, scope).await;

    let deleted_data = DeletedDataSummary {
        collections_affected: result.deleted_collections.clone(),
        object_files_count: result.object_store.removed,
        warehouse_rows_affected: result.warehouse.removed,
        identity_deleted: result.identity_deleted,
    };

    match certificate::issue_certificate(state, user_id, request_id, deleted_data, &verification)
        .await
    {
        Ok(certificate_id) => {
            result.certificate_id = Some(certificate_id.clone());
            if let Err(e) = state
                .docs
                .update(
                    DELETION_REQUEST_COLLECTION,
                    request_id,
                    json!({
                        "status": DeletionStatus::Completed.as_str(),
                        "certificate_id": certificate_id,
                        "can_recover": false,
                    }),
                )
                .await
            {
                tracing::error!(request_id, error = %e, "Failed to mark deletion request completed");
            }

            state
                .audit
                .record(
                    user_id,
                    None,
                    MutationRecord::succeeded(
                        "deletion_completed",
                        "deletion_request",
                        Some(request_id.to_string()),
                    ),
                )
                .await;

            if let (Some(email_service), Some(address)) = (&state.email, email) {
                if let Err(e) = email_service
                    .send_deletion_complete(&address, &certificate_id)
                    .await
                {
                    tracing::warn!(request_id, error = %e, "Failed to send deletion-complete email");
                }
            }

            tracing::info!(
                request_id,
                certificate_id = %result.certificate_id.as_deref().unwrap_or_default(),
                all_verified = verification.all_verified(),
                "Deletion completed and certified"
            );
        }
        Err(e) => {
            // The purge itself succeeded; surface the certification failure
            // on the request rather than inventing a rollback.
            tracing::error!(request_id, error = %e, "Certificate issuance failed");
            if let Err(e) = state
                .docs
                .update(
                    DELETION_REQUEST_COLLECTION,
                    request_id,
                    json!({
                        "status": DeletionStatus::Failed.as_str(),
                        "error": format!("certificate issuance: {e}"),
                        "can_recover": false,
                    }),
                )
                .await
            {
                tracing::error!(request_id, error = %e, "Failed to record certification failure");
            }
        }
    }
}
