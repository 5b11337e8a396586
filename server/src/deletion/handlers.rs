//! Deletion HTTP Handlers

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

use super::certificate::validate_certificate;
use super::error::DeletionError;
use super::scheduler::schedule_deletion;
use super::types::{
    CertificateValidationResponse, DeleteAccountRequest, DeletionRequest, DeletionStatusResponse,
    RecoverAccountRequest, RecoverAccountResponse, DELETION_REQUEST_COLLECTION,
};
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::stores::{FieldFilter, QueryOptions};

/// Recovery attempts allowed per email per window.
const RECOVER_ATTEMPT_LIMIT: u32 = 10;

/// Recovery attempt window in seconds.
const RECOVER_ATTEMPT_WINDOW_SECS: i64 = 900;

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
}

/// Request account deletion, scheduled behind the grace period by default.
#[utoipa::path(
    post,
    path = "/api/me/deletion",
    request_body = DeleteAccountRequest,
    responses(
        (status = 200, description = "Deletion scheduled or executed", body = DeletionStatusResponse),
        (status = 400, description = "Invalid confirmation"),
        (status = 409, description = "Deletion already requested"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn request_deletion(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    Json(body): Json<DeleteAccountRequest>,
) -> Result<Json<DeletionStatusResponse>, DeletionError> {
    if body.confirm != "DELETE" {
        return Err(DeletionError::Validation(
            "Confirmation must be the string \"DELETE\"".to_string(),
        ));
    }

    let response = schedule_deletion(
        &state,
        &auth.id.to_string(),
        body.scope,
        body.immediate,
        client_ip(&headers).as_deref(),
    )
    .await?;

    Ok(Json(response))
}

/// Status of the caller's most recent deletion request.
#[utoipa::path(
    get,
    path = "/api/me/deletion",
    responses(
        (status = 200, description = "Deletion request status", body = DeletionStatusResponse),
        (status = 404, description = "No deletion request found"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_deletion_status(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<DeletionStatusResponse>, DeletionError> {
    let user_id = auth.id.to_string();

    let latest = state
        .docs
        .query(
            DELETION_REQUEST_COLLECTION,
            &[FieldFilter::eq("user_id", &user_id)],
            QueryOptions::latest_first("requested_at").with_limit(1),
        )
        .await?
        .into_iter()
        .next()
        .ok_or(DeletionError::RequestNotFound)?;

    let request: DeletionRequest = latest.parse()?;
    Ok(Json(DeletionStatusResponse::from_request(
        &latest.id,
        &request,
        Utc::now(),
    )))
}

/// Cancel a scheduled deletion with a recovery code.
///
/// Unauthenticated on purpose: the user was signed out everywhere when the
/// deletion was scheduled.
#[utoipa::path(
    post,
    path = "/api/deletion/recover",
    request_body = RecoverAccountRequest,
    responses(
        (status = 200, description = "Deletion cancelled", body = RecoverAccountResponse),
        (status = 400, description = "Invalid or expired code"),
        (status = 404, description = "No matching scheduled deletion"),
        (status = 410, description = "Recovery deadline has passed"),
        (status = 429, description = "Too many attempts"),
    )
)]
pub async fn recover_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RecoverAccountRequest>,
) -> Result<Json<RecoverAccountResponse>, DeletionError> {
    let email = body.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(DeletionError::Validation("A valid email is required".to_string()));
    }
    if body.code.len() != 6 || !body.code.chars().all(|c| c.is_ascii_digit()) {
        return Err(DeletionError::Validation(
            "The recovery code is six digits".to_string(),
        ));
    }

    // Advisory throttle in front of the persisted per-code attempt cap.
    let decision = state.attempts.hit(
        &format!("recover:{email}"),
        RECOVER_ATTEMPT_LIMIT,
        RECOVER_ATTEMPT_WINDOW_SECS,
    );
    if !decision.allowed {
        return Err(DeletionError::TooManyAttempts);
    }

    let ip = client_ip(&headers);
    let (request_id, _request) = state
        .recovery
        .recover_account(&email, &body.code, ip.as_deref())
        .await?;

    Ok(Json(RecoverAccountResponse {
        recovered: true,
        request_id,
        message: "Account deletion has been cancelled.".to_string(),
    }))
}

/// Validate a deletion certificate by id. Public: certificates are proof
/// for people who no longer have an account.
#[utoipa::path(
    get,
    path = "/api/certificates/{certificate_id}/validate",
    params(("certificate_id" = String, Path, description = "Certificate id")),
    responses(
        (status = 200, description = "Validation outcome", body = CertificateValidationResponse),
        (status = 404, description = "Certificate not found"),
    )
)]
pub async fn validate_certificate_handler(
    State(state): State<AppState>,
    Path(certificate_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, DeletionError> {
    let response = validate_certificate(&state, &certificate_id).await?;

    let Some(certificate) = &response.certificate else {
        return Err(DeletionError::CertificateNotFound);
    };

    if let Some(user_hash) = certificate.get("user_id_hash").and_then(serde_json::Value::as_str) {
        state
            .audit
            .record_access_hashed(
                user_hash,
                "certificate_validated",
                "deletion_certificate",
                Some(&certificate_id),
                client_ip(&headers).as_deref(),
            )
            .await;
    }

    Ok(Json(response))
}
