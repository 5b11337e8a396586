//! Audit Trail
//!
//! Append-only, privacy-redacted logging of access and mutation events.
//! Entries never carry a plaintext user id or IP address, only salted
//! one-way hashes, and any value tree is redacted before it is written.
//! Recording never fails the caller: a logging outage must not block an
//! export or a deletion.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::stores::DocumentStore;

/// Collection holding mutation audit entries.
pub const AUDIT_LOG_COLLECTION: &str = "audit_logs";

/// Collection holding read/access entries.
pub const ACCESS_LOG_COLLECTION: &str = "access_logs";

/// What a redacted value is replaced with.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Field-name fragments whose values are always redacted.
const SENSITIVE_FIELD_PATTERNS: [&str; 7] = [
    "password",
    "token",
    "secret",
    "key",
    "credential",
    "authorization",
    "cookie",
];

/// Salted one-way hash used for user ids and IP addresses.
#[must_use]
pub fn hash_identifier(salt: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Replace the value of any sensitive-named field, recursively.
#[must_use]
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(field, v)| {
                    let lowered = field.to_lowercase();
                    if SENSITIVE_FIELD_PATTERNS.iter().any(|p| lowered.contains(p)) {
                        (field.clone(), Value::String(REDACTION_MARKER.to_string()))
                    } else {
                        (field.clone(), redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// A mutation to be audited.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub previous_values: Option<Value>,
    pub new_values: Option<Value>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl MutationRecord {
    #[must_use]
    pub fn succeeded(action: &str, resource_type: &str, resource_id: Option<String>) -> Self {
        Self {
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id,
            previous_values: None,
            new_values: None,
            success: true,
            error_message: None,
        }
    }

    #[must_use]
    pub fn failed(
        action: &str,
        resource_type: &str,
        resource_id: Option<String>,
        error: &str,
    ) -> Self {
        Self {
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id,
            previous_values: None,
            new_values: None,
            success: false,
            error_message: Some(error.to_string()),
        }
    }

    #[must_use]
    pub fn with_values(mut self, previous: Option<Value>, new: Option<Value>) -> Self {
        self.previous_values = previous;
        self.new_values = new;
        self
    }
}

#[derive(Debug, Serialize)]
struct AuditLogEntry {
    user_id_hash: String,
    action: String,
    resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_values: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_values: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip_address_hash: Option<String>,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct AccessLogEntry {
    user_id_hash: String,
    action: String,
    resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip_address_hash: Option<String>,
    timestamp: String,
}

/// Append-only audit writer shared by every component.
#[derive(Clone)]
pub struct AuditTrail {
    docs: Arc<dyn DocumentStore>,
    salt: String,
}

impl AuditTrail {
    pub fn new(docs: Arc<dyn DocumentStore>, salt: &str) -> Self {
        Self {
            docs,
            salt: salt.to_string(),
        }
    }

    /// The salted hash for a user id, as stored in log entries, certificates
    /// and the warehouse.
    #[must_use]
    pub fn user_hash(&self, user_id: &str) -> String {
        hash_identifier(&self.salt, user_id)
    }

    /// Record a mutation. Returns the entry id, or an empty string when the
    /// write failed (the failure is logged, never propagated).
    pub async fn record(
        &self,
        user_id: &str,
        ip_address: Option<&str>,
        record: MutationRecord,
    ) -> String {
        let entry = AuditLogEntry {
            user_id_hash: self.user_hash(user_id),
            action: record.action,
            resource_type: record.resource_type,
            resource_id: record.resource_id,
            previous_values: record.previous_values.as_ref().map(redact),
            new_values: record.new_values.as_ref().map(redact),
            ip_address_hash: ip_address.map(|ip| hash_identifier(&self.salt, ip)),
            success: record.success,
            error_message: record.error_message,
            timestamp: Utc::now().to_rfc3339(),
        };
        self.append(AUDIT_LOG_COLLECTION, &entry).await
    }

    /// Record an access event for a subject only known by hash (certificate
    /// lookups happen after the plaintext id is gone).
    pub async fn record_access_hashed(
        &self,
        user_id_hash: &str,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        ip_address: Option<&str>,
    ) -> String {
        let entry = AccessLogEntry {
            user_id_hash: user_id_hash.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(ToString::to_string),
            ip_address_hash: ip_address.map(|ip| hash_identifier(&self.salt, ip)),
            timestamp: Utc::now().to_rfc3339(),
        };
        self.append(ACCESS_LOG_COLLECTION, &entry).await
    }

    /// Record a read/access event (export download, certificate lookup).
    pub async fn record_access(
        &self,
        user_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        ip_address: Option<&str>,
    ) -> String {
        let entry = AccessLogEntry {
            user_id_hash: self.user_hash(user_id),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(ToString::to_string),
            ip_address_hash: ip_address.map(|ip| hash_identifier(&self.salt, ip)),
            timestamp: Utc::now().to_rfc3339(),
        };
        self.append(ACCESS_LOG_COLLECTION, &entry).await
    }

    async fn append<T: Serialize>(&self, collection: &str, entry: &T) -> String {
        let id = Uuid::new_v4().to_string();
        let data = match serde_json::to_value(entry) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, collection, "Failed to serialize log entry");
                return String::new();
            }
        };

        match self.docs.create(collection, &id, data).await {
            Ok(()) => id,
            Err(e) => {
                tracing::warn!(error = %e, collection, "Failed to write log entry");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryDocumentStore;
    use serde_json::json;

    #[test]
    fn redact_replaces_sensitive_fields_recursively() {
        let input = json!({
            "display_name": "Ada",
            "password": "hunter2",
            "api_token": "tok_123",
            "nested": {
                "s3_key": "users/u1/avatar.png",
                "Authorization": "Bearer abc",
                "heart_rate": [72, 80],
            },
            "consents": [{"refresh_token": "r", "granted": true}],
        });

        let redacted = redact(&input);
        assert_eq!(redacted["display_name"], "Ada");
        assert_eq!(redacted["password"], REDACTION_MARKER);
        assert_eq!(redacted["api_token"], REDACTION_MARKER);
        assert_eq!(redacted["nested"]["s3_key"], REDACTION_MARKER);
        assert_eq!(redacted["nested"]["Authorization"], REDACTION_MARKER);
        assert_eq!(redacted["nested"]["heart_rate"][1], 80);
        assert_eq!(redacted["consents"][0]["refresh_token"], REDACTION_MARKER);
        assert_eq!(redacted["consents"][0]["granted"], true);
    }

    #[test]
    fn hash_is_stable_and_salted() {
        let a = hash_identifier("salt-a", "user-1");
        assert_eq!(a, hash_identifier("salt-a", "user-1"));
        assert_ne!(a, hash_identifier("salt-b", "user-1"));
        assert_ne!(a, "user-1");
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn record_survives_store_outage() {
        let docs = Arc::new(MemoryDocumentStore::new());
        docs.fail_collection(AUDIT_LOG_COLLECTION);
        let audit = AuditTrail::new(docs, "salt");

        let id = audit
            .record(
                "user-1",
                Some("203.0.113.9"),
                MutationRecord::succeeded("deletion_scheduled", "deletion_request", None),
            )
            .await;
        assert!(id.is_empty(), "outage must yield the sentinel id");
    }

    #[tokio::test]
    async fn record_writes_hashed_and_redacted_entry() {
        let docs = Arc::new(MemoryDocumentStore::new());
        let audit = AuditTrail::new(docs.clone(), "salt");

        let id = audit
            .record(
                "user-1",
                Some("203.0.113.9"),
                MutationRecord::succeeded("settings_update", "settings", Some("user-1".into()))
                    .with_values(None, Some(json!({"push_token": "t", "units": "km"}))),
            )
            .await;
        assert!(!id.is_empty());

        let doc = docs.get(AUDIT_LOG_COLLECTION, &id).await.unwrap().unwrap();
        assert_eq!(doc.data["new_values"]["push_token"], REDACTION_MARKER);
        assert_eq!(doc.data["new_values"]["units"], "km");
        assert_ne!(doc.data["user_id_hash"], "user-1");
        assert!(doc.data.get("ip_address").is_none());
    }
}
