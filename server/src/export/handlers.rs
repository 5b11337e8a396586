//! Export HTTP Handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use super::error::ExportError;
use super::pipeline::process_export_job;
use super::types::{
    ExportJob, ExportJobResponse, ExportRequest, EXPORT_JOB_COLLECTION,
};
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::stores::{FieldFilter, QueryOptions};

/// Threshold after which a pending/processing job is considered abandoned
/// (crash/restart) and failed so the user is not locked out.
const STALE_JOB_HOURS: i64 = 1;

/// Request a data export.
///
/// Creates a background job that gathers all user data into a downloadable
/// archive. Only one pending/processing export per user is allowed.
#[utoipa::path(
    post,
    path = "/api/me/export",
    request_body = ExportRequest,
    responses(
        (status = 201, description = "Export job created", body = ExportJobResponse),
        (status = 409, description = "Export already in progress"),
        (status = 503, description = "File storage not configured"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn request_export(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<ExportRequest>,
) -> Result<impl IntoResponse, ExportError> {
    let user_id = auth.id.to_string();

    if state.objects.is_none() {
        return Err(ExportError::StorageNotConfigured);
    }

    // Recover jobs abandoned by a crash/restart so the active-job
    // uniqueness check cannot lock the user out forever.
    fail_stale_jobs(&state, &user_id).await?;

    for active_status in ["pending", "processing"] {
        let active = state
            .docs
            .query(
                EXPORT_JOB_COLLECTION,
                &[
                    FieldFilter::eq("user_id", &user_id),
                    FieldFilter::eq("status", active_status),
                ],
                QueryOptions::limit(1),
            )
            .await?;
        if !active.is_empty() {
            return Err(ExportError::AlreadyPending);
        }
    }

    let job_id = Uuid::new_v4().to_string();
    let job = ExportJob {
        user_id: user_id.clone(),
        status: "pending".to_string(),
        format: request.format,
        created_at: Utc::now(),
        completed_at: None,
        storage_key: None,
        download_url: None,
        expires_at: None,
        file_size_bytes: None,
        record_count: None,
        error_message: None,
    };
    let data = serde_json::to_value(&job)
        .map_err(|e| ExportError::Validation(format!("job serialization: {e}")))?;
    state.docs.create(EXPORT_JOB_COLLECTION, &job_id, data).await?;

    // Spawn background export worker
    let worker_state = state.clone();
    let worker_job_id = job_id.clone();
    let worker_user_id = user_id.clone();
    tokio::spawn(async move {
        process_export_job(worker_state, worker_job_id, worker_user_id, request).await;
    });

    let response = ExportJobResponse::from_job(&job_id, job, Utc::now());
    Ok((StatusCode::CREATED, Json(response)))
}

/// Get the status of the most recent export job.
#[utoipa::path(
    get,
    path = "/api/me/export",
    responses(
        (status = 200, description = "Export job status", body = ExportJobResponse),
        (status = 404, description = "No export job found"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_export_status(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<ExportJobResponse>, ExportError> {
    let user_id = auth.id.to_string();

    let latest = state
        .docs
        .query(
            EXPORT_JOB_COLLECTION,
            &[FieldFilter::eq("user_id", &user_id)],
            QueryOptions::latest_first("created_at").with_limit(1),
        )
        .await?
        .into_iter()
        .next()
        .ok_or(ExportError::NotFound)?;

    let job: ExportJob = latest.parse()?;

    state
        .audit
        .record_access(&user_id, "export_status", "export_archive", Some(&latest.id), None)
        .await;

    Ok(Json(ExportJobResponse::from_job(&latest.id, job, Utc::now())))
}

async fn fail_stale_jobs(state: &AppState, user_id: &str) -> Result<(), ExportError> {
    let cutoff = Utc::now() - Duration::hours(STALE_JOB_HOURS);
    for status in ["pending", "processing"] {
        let stale = state
            .docs
            .query(
                EXPORT_JOB_COLLECTION,
                &[
                    FieldFilter::eq("user_id", user_id),
                    FieldFilter::eq("status", status),
                    FieldFilter::before("created_at", cutoff),
                ],
                QueryOptions::default(),
            )
            .await?;

        for job in stale {
            tracing::warn!(job_id = %job.id, user_id, "Failing stale export job");
            state
                .docs
                .update(
                    EXPORT_JOB_COLLECTION,
                    &job.id,
                    json!({
                        "status": "failed",
                        "error_message": "Job stale after restart; please retry",
                        "completed_at": Utc::now().to_rfc3339(),
                    }),
                )
                .await?;
        }
    }
    Ok(())
}
