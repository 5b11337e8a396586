//! Export Error Types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::stores::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Export job not found")]
    NotFound,

    #[error("An export is already in progress")]
    AlreadyPending,

    #[error("File storage not configured")]
    StorageNotConfigured,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ExportError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            Self::AlreadyPending => (StatusCode::CONFLICT, self.to_string()),
            Self::StorageNotConfigured => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::Store(e) => {
                tracing::error!(error = %e, "Export store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
