//! Collector Facade
//!
//! Aggregates the per-domain read-only snapshots into one export-shaped
//! dataset. The facade is thin on purpose: each domain read is a plain
//! collaborator call, and a domain with nothing stored becomes an absent
//! field, never an error for the whole pipeline.

use chrono::Utc;
use serde_json::Value;

use super::types::{AnalyticsSummary, BillingSummary, ExportDataset, StorageFileEntry};
use crate::api::AppState;
use crate::stores::{FieldFilter, QueryOptions, StoreError};

/// Whether a scope list covers a domain. An empty scope means everything,
/// as does the literal `all`.
#[must_use]
pub fn scope_includes(scope: &[String], domain: &str) -> bool {
    scope.is_empty() || scope.iter().any(|s| s == "all" || s == domain)
}

/// Collect every in-scope domain for one user.
pub async fn collect(
    state: &AppState,
    user_id: &str,
    scope: &[String],
    include_storage_files: bool,
    include_analytics: bool,
) -> Result<ExportDataset, StoreError> {
    let profile = if scope_includes(scope, "profile") {
        state
            .docs
            .get("users", user_id)
            .await?
            .map(|doc| doc.data)
    } else {
        None
    };

    let activity_sessions = if scope_includes(scope, "activity") {
        Some(query_domain(state, "activity_sessions", user_id).await?)
    } else {
        None
    };

    let consents = if scope_includes(scope, "consents") {
        Some(query_domain(state, "consents", user_id).await?)
    } else {
        None
    };

    let settings = if scope_includes(scope, "settings") {
        state
            .docs
            .get("settings", user_id)
            .await?
            .map(|doc| doc.data)
    } else {
        None
    };

    let billing = if scope_includes(scope, "billing") {
        state
            .billing
            .find_customer_id(user_id)
            .await?
            .map(|customer_id| BillingSummary { customer_id })
    } else {
        None
    };

    let storage_files = match (&state.objects, include_storage_files) {
        (Some(objects), true) => {
            let files = objects
                .list(&format!("users/{user_id}/"))
                .await?
                .into_iter()
                .map(|meta| StorageFileEntry {
                    key: meta.key,
                    size_bytes: meta.size,
                })
                .collect();
            Some(files)
        }
        _ => None,
    };

    let analytics = if include_analytics {
        match state
            .warehouse
            .remaining_events(&state.audit.user_hash(user_id))
            .await
        {
            Ok(event_types) => Some(AnalyticsSummary { event_types }),
            // No events table, no analytics footprint.
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    Ok(ExportDataset {
        user_id: user_id.to_string(),
        generated_at: Utc::now(),
        profile,
        activity_sessions,
        consents,
        settings,
        billing,
        storage_files,
        analytics,
    })
}

async fn query_domain(
    state: &AppState,
    collection: &str,
    user_id: &str,
) -> Result<Vec<Value>, StoreError> {
    let docs = state
        .docs
        .query(
            collection,
            &[FieldFilter::eq("user_id", user_id)],
            QueryOptions::default(),
        )
        .await?;
    Ok(docs.into_iter().map(|doc| doc.data).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_matching() {
        let all = vec!["all".to_string()];
        assert!(scope_includes(&all, "profile"));
        assert!(scope_includes(&[], "consents"));

        let partial = vec!["profile".to_string(), "activity".to_string()];
        assert!(scope_includes(&partial, "activity"));
        assert!(!scope_includes(&partial, "billing"));
    }
}
