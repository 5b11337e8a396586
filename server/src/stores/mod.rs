//! Data Store Collaborators
//!
//! Interface boundary to the five independently-owned systems that hold user
//! data: the structured document store, the object store, the analytics
//! warehouse, the identity provider and the billing processor. Each is a
//! trait with a production implementation plus an in-memory implementation
//! used by tests and local development.

pub mod billing;
pub mod document;
pub mod identity;
pub mod memory;
pub mod object;
pub mod warehouse;

pub use billing::{BillingProcessor, HttpBillingProcessor};
pub use document::{DocumentStore, PostgresDocumentStore};
pub use identity::{HttpIdentityProvider, IdentityAccount, IdentityProvider};
pub use memory::{
    MemoryBillingProcessor, MemoryDocumentStore, MemoryIdentityProvider, MemoryObjectStore,
    MemoryWarehouse,
};
pub use object::{ObjectMeta, ObjectStore, S3ObjectStore};
pub use warehouse::{AnalyticsWarehouse, PostgresWarehouse};

use std::future::Future;

use serde_json::Value;

/// Errors shared by all store collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The addressed resource does not exist (document, object, customer,
    /// account, or the backing table itself).
    #[error("not found: {0}")]
    NotFound(String),

    /// A guarded write observed a different value than expected.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Anything else the backend reported (network, timeout, permission).
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether this error means "the resource is already gone".
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".into()),
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Reference to a single document in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// A document read back from the store: its id plus the JSON body.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    /// Deserialize the JSON body into a typed entity.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| StoreError::Backend(format!("malformed document {}: {e}", self.id)))
    }
}

/// A single field predicate for document queries.
///
/// `Eq` compares the field as text. `Before` compares the field as an
/// RFC 3339 timestamp, strictly earlier than the given instant; it is what
/// the expiry sweeps and due-schedule lookups are built on.
#[derive(Debug, Clone)]
pub enum FieldFilter {
    Eq { field: String, value: String },
    Before { field: String, instant: chrono::DateTime<chrono::Utc> },
}

impl FieldFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn before(field: impl Into<String>, instant: chrono::DateTime<chrono::Utc>) -> Self {
        Self::Before {
            field: field.into(),
            instant,
        }
    }
}

/// Ordering and paging for document queries.
///
/// `order_by_desc` names a field holding an RFC 3339 timestamp; results come
/// back newest-first.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub order_by_desc: Option<String>,
    pub limit: Option<usize>,
}

impl QueryOptions {
    #[must_use]
    pub fn latest_first(field: &str) -> Self {
        Self {
            order_by_desc: Some(field.to_string()),
            limit: None,
        }
    }

    #[must_use]
    pub fn limit(limit: usize) -> Self {
        Self {
            order_by_desc: None,
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One write inside an all-or-nothing batch ([`DocumentStore::transact`]).
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Merge-patch an existing document.
    Patch { doc: DocRef, data: Value },
    /// Merge-patch only if `guard_field` currently equals `expected`;
    /// otherwise the whole batch aborts with [`StoreError::Conflict`].
    PatchIf {
        doc: DocRef,
        guard_field: String,
        expected: String,
        data: Value,
    },
}

/// Run a delete-style operation, mapping "already gone" to success.
///
/// Four of the five collaborators share the idiom that deleting an absent
/// resource is not an error. Returns `Ok(true)` when something was deleted
/// and `Ok(false)` when the resource was already missing.
pub async fn delete_idempotently<F, Fut>(op: F) -> Result<bool, StoreError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    match op().await {
        Ok(()) => Ok(true),
        Err(e) if e.is_missing() => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delete_idempotently_maps_missing_to_success() {
        let deleted = delete_idempotently(|| async { Ok(()) }).await.unwrap();
        assert!(deleted);

        let deleted = delete_idempotently(|| async {
            Err(StoreError::NotFound("customer cus_123".into()))
        })
        .await
        .unwrap();
        assert!(!deleted);

        let err = delete_idempotently(|| async {
            Err::<(), _>(StoreError::Backend("connection reset".into()))
        })
        .await;
        assert!(err.is_err());
    }
}
