//! Deletion Domain Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Collection holding deletion request documents.
pub const DELETION_REQUEST_COLLECTION: &str = "deletion_requests";

/// Collection holding recovery code documents.
pub const RECOVERY_CODE_COLLECTION: &str = "recovery_codes";

/// Collection holding issued deletion certificates.
pub const CERTIFICATE_COLLECTION: &str = "deletion_certificates";

/// Deletion request state machine.
///
/// `pending → scheduled → processing → {completed | failed}`, with
/// `scheduled → cancelled` via recovery. Immediate deletion skips
/// `scheduled`. `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeletionStatus {
    Pending,
    Scheduled,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl DeletionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Persisted deletion request. The document id is the request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub user_id: String,
    pub scope: Vec<String>,
    pub status: DeletionStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_deletion_date: Option<DateTime<Utc>>,
    pub can_recover: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recover_deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeletionRequest {
    /// The recoverability invariant, evaluated against a clock rather than
    /// trusting the stored flag: recoverable only while still `scheduled`
    /// and before the deadline.
    #[must_use]
    pub fn recoverable_at(&self, now: DateTime<Utc>) -> bool {
        self.can_recover
            && self.status == DeletionStatus::Scheduled
            && self.recover_deadline.is_some_and(|deadline| now < deadline)
    }
}

/// Recovery code lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryCodeStatus {
    Pending,
    Verified,
    Expired,
    Invalidated,
}

/// Persisted recovery code. Codes transition status but are never deleted;
/// the trail of invalidated codes has audit value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryCode {
    pub user_id: String,
    pub email: String,
    pub code: String,
    pub status: RecoveryCodeStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_request_id: Option<String>,
}

/// Lazy-expiry predicate: handlers call this on read; the sweep is only
/// storage hygiene.
#[must_use]
pub fn is_expired(code: &RecoveryCode, now: DateTime<Utc>) -> bool {
    code.expires_at <= now
}

/// Outcome of purging one subsystem.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubsystemResult {
    /// The subsystem finished without error.
    pub ok: bool,
    /// Documents / files / rows removed.
    pub removed: u64,
}

/// Aggregated outcome of one cross-system purge.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionResult {
    /// Overall success: document store and identity provider succeeded.
    /// Object-store and warehouse failures are recorded but non-fatal.
    pub success: bool,
    pub deleted_collections: Vec<String>,
    pub document_store: SubsystemResult,
    pub object_store: SubsystemResult,
    pub warehouse: SubsystemResult,
    pub billing: SubsystemResult,
    pub identity_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
    pub errors: Vec<String>,
}

/// Outcome of independently re-querying every system after a purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub document_store_verified: bool,
    pub object_store_verified: bool,
    pub warehouse_verified: bool,
    pub identity_verified: bool,
    /// Named resources still present, empty when clean.
    pub remaining: Vec<String>,
}

impl VerificationResult {
    #[must_use]
    pub const fn all_verified(&self) -> bool {
        self.document_store_verified
            && self.object_store_verified
            && self.warehouse_verified
            && self.identity_verified
    }
}

/// What was removed, as recorded on the certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedDataSummary {
    pub collections_affected: Vec<String>,
    pub object_files_count: u64,
    pub warehouse_rows_affected: u64,
    pub identity_deleted: bool,
}

/// Signed, queryable proof of a completed and verified deletion.
///
/// Immutable once written. Never references the raw user id, only a salted
/// one-way hash, so it stays useful as proof after the user is gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionCertificate {
    pub user_id_hash: String,
    pub deletion_request_id: String,
    pub deleted_at: DateTime<Utc>,
    pub deleted_data: DeletedDataSummary,
    pub verification_result: VerificationResult,
    pub signature: String,
    pub signature_algorithm: String,
    pub issued_at: DateTime<Utc>,
    pub issued_by: String,
}

// ============================================================================
// Request/response types
// ============================================================================

/// Request to delete the account.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct DeleteAccountRequest {
    /// Confirmation string - must be "DELETE" to proceed.
    pub confirm: String,
    /// Skip the grace period and purge immediately.
    #[serde(default)]
    pub immediate: bool,
    /// Data domains to delete (default: everything).
    #[serde(default = "default_scope")]
    pub scope: Vec<String>,
}

fn default_scope() -> Vec<String> {
    vec!["all".to_string()]
}

/// Response after requesting or inspecting a deletion.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DeletionStatusResponse {
    pub request_id: String,
    pub status: DeletionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_deletion_date: Option<DateTime<Utc>>,
    pub can_recover: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recover_deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DeletionStatusResponse {
    #[must_use]
    pub fn from_request(request_id: &str, request: &DeletionRequest, now: DateTime<Utc>) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: request.status,
            scheduled_deletion_date: request.scheduled_deletion_date,
            can_recover: request.recoverable_at(now),
            recover_deadline: request.recover_deadline,
            certificate_id: request.certificate_id.clone(),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }
}

/// Request to recover an account with a code.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RecoverAccountRequest {
    pub email: String,
    pub code: String,
}

/// Response after a successful recovery.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RecoverAccountResponse {
    pub recovered: bool,
    pub request_id: String,
    pub message: String,
}

/// Response for certificate validation.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CertificateValidationResponse {
    /// The stored signature matches the recomputed one.
    pub valid: bool,
    /// The certificate body (also returned on signature mismatch, so the
    /// discrepancy can be inspected).
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub certificate: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
