//! Export Pipeline Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Collection holding export job records.
pub const EXPORT_JOB_COLLECTION: &str = "export_archives";

/// Output format for the export archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

/// One file found under the user's object-store namespace.
#[derive(Debug, Clone, Serialize)]
pub struct StorageFileEntry {
    pub key: String,
    pub size_bytes: i64,
}

/// Per-event-type warehouse footprint.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub event_types: Vec<String>,
}

/// Billing relationship snapshot (never card data; the processor owns that).
#[derive(Debug, Clone, Serialize)]
pub struct BillingSummary {
    pub customer_id: String,
}

/// Everything collected for one user, one domain per field.
///
/// A domain the user has no data in is `None`/empty, which the transform
/// and archive stages must render as absent rather than failing.
#[derive(Debug, Clone, Serialize)]
pub struct ExportDataset {
    pub user_id: String,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Value>,
    /// `None` = domain not collected; `Some(vec![])` = collected, no data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_sessions: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consents: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing: Option<BillingSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_files: Option<Vec<StorageFileEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics: Option<AnalyticsSummary>,
}

impl ExportDataset {
    /// Total records across all domains, reported on the job.
    #[must_use]
    pub fn record_count(&self) -> usize {
        usize::from(self.profile.is_some())
            + self.activity_sessions.as_ref().map_or(0, Vec::len)
            + self.consents.as_ref().map_or(0, Vec::len)
            + usize::from(self.settings.is_some())
            + usize::from(self.billing.is_some())
            + self.storage_files.as_ref().map_or(0, Vec::len)
            + self
                .analytics
                .as_ref()
                .map_or(0, |a| a.event_types.len())
    }
}

/// Persisted export job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    pub user_id: String,
    pub status: String,
    pub format: ExportFormat,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Request body for starting an export.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ExportRequest {
    /// Archive format (default: json).
    #[serde(default)]
    pub format: ExportFormat,
    /// Include the list of stored media files.
    #[serde(default = "default_true")]
    pub include_storage_files: bool,
    /// Include the analytics footprint summary.
    #[serde(default = "default_true")]
    pub include_analytics: bool,
}

const fn default_true() -> bool {
    true
}

/// Response for an export job.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ExportJobResponse {
    /// Job ID.
    pub id: String,
    /// Job status: pending, processing, completed, failed, expired.
    pub status: String,
    /// Archive format.
    pub format: ExportFormat,
    /// Signed download URL (when completed and unexpired).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// When the download expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Archive size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<i64>,
    /// Records included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<i64>,
    /// Failure reason (when failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
}

impl ExportJobResponse {
    #[must_use]
    pub fn from_job(id: &str, job: ExportJob, now: DateTime<Utc>) -> Self {
        // Never hand out a URL past its expiry, even before the cleanup
        // sweep has reclaimed the object.
        let unexpired = job.expires_at.is_none_or(|at| at > now);
        Self {
            id: id.to_string(),
            download_url: job.download_url.filter(|_| unexpired),
            status: job.status,
            format: job.format,
            expires_at: job.expires_at,
            file_size_bytes: job.file_size_bytes,
            record_count: job.record_count,
            error_message: job.error_message,
            created_at: job.created_at,
        }
    }
}
