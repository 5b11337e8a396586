//! Export Worker and Cleanup
//!
//! Composes collect → archive → publish end to end for one job, and runs
//! the retention sweep that reclaims expired archives.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use serde_json::json;

use super::archive::build_archive;
use super::collector::collect;
use super::types::{ExportRequest, EXPORT_JOB_COLLECTION};
use crate::api::AppState;
use crate::audit::MutationRecord;
use crate::stores::{FieldFilter, ObjectStore, QueryOptions, StoreError};

/// What `publish` hands back for the job record.
pub struct PublishedArchive {
    pub storage_key: String,
    pub download_url: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub file_size_bytes: i64,
}

/// Upload the archive and sign a time-limited download link.
///
/// Upload failure is fatal to the caller: a partially published export must
/// never be reported as success.
pub async fn publish(
    objects: &Arc<dyn ObjectStore>,
    user_id: &str,
    job_id: &str,
    bytes: Vec<u8>,
    retention_days: i64,
) -> Result<PublishedArchive, StoreError> {
    let storage_key = format!("exports/{user_id}/{job_id}.zip");
    let file_size_bytes = bytes.len() as i64;

    objects
        .upload(&storage_key, bytes, "application/zip")
        .await?;
    let download_url = objects.presign_get(&storage_key).await?;

    Ok(PublishedArchive {
        storage_key,
        download_url,
        expires_at: Utc::now() + Duration::days(retention_days),
        file_size_bytes,
    })
}

/// Process one export job end to end.
///
/// Every stage failure is caught here and lands on the job record as
/// `failed` with a user-safe message; the raw error goes to the log only.
pub async fn process_export_job(
    state: AppState,
    job_id: String,
    user_id: String,
    request: ExportRequest,
) {
    if let Err(e) = state
        .docs
        .update(
            EXPORT_JOB_COLLECTION,
            &job_id,
            json!({ "status": "processing" }),
        )
        .await
    {
        tracing::error!(job_id, error = %e, "Failed to mark export job processing");
        return;
    }

    match run_export(&state, &job_id, &user_id, &request).await {
        Ok((published, record_count)) => {
            let patch = json!({
                "status": "completed",
                "storage_key": published.storage_key,
                "download_url": published.download_url,
                "expires_at": published.expires_at.to_rfc3339(),
                "file_size_bytes": published.file_size_bytes,
                "record_count": record_count as i64,
                "completed_at": Utc::now().to_rfc3339(),
            });
            if let Err(e) = state.docs.update(EXPORT_JOB_COLLECTION, &job_id, patch).await {
                tracing::error!(job_id, error = %e, "Failed to mark export job completed");
                return;
            }

            tracing::info!(
                job_id,
                user_id,
                file_size = published.file_size_bytes,
                record_count,
                "Export job completed"
            );

            state
                .audit
                .record(
                    &user_id,
                    None,
                    MutationRecord::succeeded("export_completed", "export_archive", Some(job_id)),
                )
                .await;

            if let Some(email) = &state.email {
                if let Some(address) = user_email(&state, &user_id).await {
                    if let Err(e) = email
                        .send_export_ready(&address, &published.download_url)
                        .await
                    {
                        tracing::warn!(user_id, error = %e, "Failed to send export-ready email");
                    }
                }
            }
        }
        Err(e) => {
            tracing::error!(job_id, user_id, error = %e, "Export job failed");

            let patch = json!({
                "status": "failed",
                // User-visible reason stays generic; internals are in the log.
                "error_message": "Export failed; please request a new export.",
                "completed_at": Utc::now().to_rfc3339(),
            });
            if let Err(e) = state.docs.update(EXPORT_JOB_COLLECTION, &job_id, patch).await {
                tracing::error!(job_id, error = %e, "Failed to mark export job failed");
            }

            state
                .audit
                .record(
                    &user_id,
                    None,
                    MutationRecord::failed(
                        "export_failed",
                        "export_archive",
                        Some(job_id),
                        &e.to_string(),
                    ),
                )
                .await;
        }
    }
}

/// The fallible stages, composed. Returns the published archive plus the
/// dataset record count.
async fn run_export(
    state: &AppState,
    job_id: &str,
    user_id: &str,
    request: &ExportRequest,
) -> Result<(PublishedArchive, usize)> {
    let objects = state
        .objects
        .as_ref()
        .ok_or_else(|| anyhow!("object storage not configured"))?;

    let dataset = collect(
        state,
        user_id,
        &[],
        request.include_storage_files,
        request.include_analytics,
    )
    .await
    .context("collecting dataset")?;
    let record_count = dataset.record_count();

    let profile_image = fetch_avatar(objects, &dataset).await;

    let bytes = build_archive(&dataset, request.format, true, profile_image)
        .context("building archive")?;

    let published = publish(
        objects,
        user_id,
        job_id,
        bytes,
        state.config.export_retention_days,
    )
    .await
    .context("publishing archive")?;

    Ok((published, record_count))
}

/// Pull the avatar bytes when the profile references one. Best-effort: an
/// unfetchable avatar does not fail the export.
async fn fetch_avatar(
    objects: &Arc<dyn ObjectStore>,
    dataset: &super::types::ExportDataset,
) -> Option<(Vec<u8>, String)> {
    let profile = dataset.profile.as_ref()?;
    let key = profile.get("avatar_key")?.as_str()?;
    let content_type = profile
        .get("avatar_content_type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("image/jpeg")
        .to_string();

    match objects.get(key).await {
        Ok(Some(bytes)) => Some((bytes, content_type)),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(user_id = %dataset.user_id, error = %e, "Avatar fetch failed; exporting without it");
            None
        }
    }
}

/// Reclaim expired export archives.
///
/// Deletes each archive object, then marks the job expired and drops the
/// dead link. A failed object delete keeps that job retryable on the next
/// sweep; per-file errors never abort the sweep.
pub async fn cleanup_expired_exports(state: &AppState) {
    let Some(objects) = &state.objects else {
        // Without storage we cannot reclaim objects; marking jobs expired
        // anyway would orphan them.
        tracing::debug!("Object storage unavailable; skipping export cleanup");
        return;
    };

    let expired = match state
        .docs
        .query(
            EXPORT_JOB_COLLECTION,
            &[
                FieldFilter::eq("status", "completed"),
                FieldFilter::before("expires_at", Utc::now()),
            ],
            QueryOptions::default(),
        )
        .await
    {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::warn!(error = %e, "Export cleanup query failed");
            return;
        }
    };

    if expired.is_empty() {
        return;
    }

    let mut reclaimed = 0usize;
    for job in expired {
        let storage_key = job
            .data
            .get("storage_key")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);

        if let Some(key) = &storage_key {
            if let Err(e) = objects.delete(key).await {
                tracing::warn!(
                    job_id = %job.id,
                    storage_key = %key,
                    error = %e,
                    "Failed to delete expired export archive; keeping job retryable"
                );
                continue;
            }
        }

        let patch = json!({
            "status": "expired",
            "storage_key": null,
            "download_url": null,
        });
        match state.docs.update(EXPORT_JOB_COLLECTION, &job.id, patch).await {
            Ok(()) => reclaimed += 1,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to mark export expired");
            }
        }
    }

    if reclaimed > 0 {
        tracing::debug!(count = reclaimed, "Cleaned up expired export archives");
    }
}

async fn user_email(state: &AppState, user_id: &str) -> Option<String> {
    state
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
        })
}
