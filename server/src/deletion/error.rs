//! Deletion Error Types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::stores::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum DeletionError {
    #[error("Account deletion already requested")]
    AlreadyRequested,

    #[error("No deletion request found")]
    RequestNotFound,

    #[error("Deletion certificate not found")]
    CertificateNotFound,

    #[error("Invalid recovery code")]
    CodeInvalid {
        remaining_attempts: Option<u32>,
    },

    #[error("Recovery code has expired")]
    CodeExpired,

    #[error("No deletion is scheduled for this account")]
    NoActiveSchedule,

    #[error("The recovery deadline has passed")]
    DeadlinePassed,

    #[error("Too many attempts; try again later")]
    TooManyAttempts,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for DeletionError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::AlreadyRequested => (StatusCode::CONFLICT, json!({ "error": self.to_string() })),
            Self::RequestNotFound | Self::CertificateNotFound | Self::NoActiveSchedule => {
                (StatusCode::NOT_FOUND, json!({ "error": self.to_string() }))
            }
            Self::CodeInvalid { remaining_attempts } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": self.to_string(),
                    "remaining_attempts": remaining_attempts,
                }),
            ),
            Self::CodeExpired => (StatusCode::BAD_REQUEST, json!({ "error": self.to_string() })),
            Self::DeadlinePassed => (StatusCode::GONE, json!({ "error": self.to_string() })),
            Self::TooManyAttempts => {
                (StatusCode::TOO_MANY_REQUESTS, json!({ "error": self.to_string() }))
            }
            Self::Validation(_) => (StatusCode::BAD_REQUEST, json!({ "error": self.to_string() })),
            Self::Store(e) => {
                tracing::error!(error = %e, "Deletion store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
