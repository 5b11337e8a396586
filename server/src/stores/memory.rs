//! In-Memory Store Implementations
//!
//! Hermetic implementations of every collaborator trait, used by the test
//! suite and by local development when no backends are configured. The
//! `fail_*` switches inject the partial-failure behaviors the orchestrator
//! has to survive (a store whose reads error, an object that refuses
//! deletion, a missing warehouse table).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{
    AnalyticsWarehouse, BillingProcessor, DocRef, Document, DocumentStore, FieldFilter,
    IdentityAccount, IdentityProvider, ObjectMeta, ObjectStore, QueryOptions, StoreError, WriteOp,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shallow merge-patch: `null` clears the field, anything else replaces it.
fn merge_patch(target: &mut Value, patch: &Value) {
    let (Some(target_map), Some(patch_map)) = (target.as_object_mut(), patch.as_object()) else {
        *target = patch.clone();
        return;
    };
    for (key, value) in patch_map {
        if value.is_null() {
            target_map.remove(key);
        } else {
            target_map.insert(key.clone(), value.clone());
        }
    }
}

fn matches(data: &Value, filter: &FieldFilter) -> bool {
    match filter {
        FieldFilter::Eq { field, value } => field_as_text(data, field).as_deref() == Some(value),
        FieldFilter::Before { field, instant } => field_as_text(data, field)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .is_some_and(|t| t.with_timezone(&Utc) < *instant),
    }
}

fn field_as_text(data: &Value, field: &str) -> Option<String> {
    match data.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

// ============================================================================
// Document store
// ============================================================================

/// In-memory document store: collections of id-ordered JSON documents.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    /// Collections whose reads and writes error, for failure-path tests.
    failing: Mutex<HashSet<String>>,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `collection` fail until cleared.
    pub fn fail_collection(&self, collection: &str) {
        lock(&self.failing).insert(collection.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.failing).clear();
    }

    /// Number of documents currently in a collection.
    pub fn len(&self, collection: &str) -> usize {
        lock(&self.collections)
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn check(&self, collection: &str) -> Result<(), StoreError> {
        if lock(&self.failing).contains(collection) {
            return Err(StoreError::Backend(format!(
                "simulated outage on {collection}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.check(collection)?;
        Ok(lock(&self.collections)
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document {
                id: id.to_string(),
                data: data.clone(),
            }))
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        self.check(collection)?;
        lock(&self.collections)
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        Ok(())
    }

    async fn create(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        self.check(collection)?;
        let mut collections = lock(&self.collections);
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(StoreError::Conflict(format!("{collection}/{id} already exists")));
        }
        docs.insert(id.to_string(), data);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        self.check(collection)?;
        let mut collections = lock(&self.collections);
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound(format!("{collection}/{id}")))?;
        merge_patch(doc, &patch);
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[FieldFilter],
        opts: QueryOptions,
    ) -> Result<Vec<Document>, StoreError> {
        self.check(collection)?;
        let collections = lock(&self.collections);
        let mut results: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, data)| filters.iter().all(|f| matches(data, f)))
                    .map(|(id, data)| Document {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order_field) = &opts.order_by_desc {
            results.sort_by_key(|doc| {
                std::cmp::Reverse(
                    field_as_text(&doc.data, order_field)
                        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                        .map(|t| t.with_timezone(&Utc)),
                )
            });
        }
        if let Some(limit) = opts.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn batch_delete(&self, refs: &[DocRef]) -> Result<u64, StoreError> {
        let mut deleted = 0u64;
        let mut collections = lock(&self.collections);
        for doc in refs {
            if lock(&self.failing).contains(&doc.collection) {
                return Err(StoreError::Backend(format!(
                    "simulated outage on {}",
                    doc.collection
                )));
            }
            if let Some(docs) = collections.get_mut(&doc.collection) {
                if docs.remove(&doc.id).is_some() {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut collections = lock(&self.collections);

        // Validate every guard against current state before touching anything,
        // so a failed guard leaves the batch unapplied.
        for op in &ops {
            let (doc, guard) = match op {
                WriteOp::Patch { doc, .. } => (doc, None),
                WriteOp::PatchIf {
                    doc,
                    guard_field,
                    expected,
                    ..
                } => (doc, Some((guard_field, expected))),
            };
            let current = collections
                .get(&doc.collection)
                .and_then(|docs| docs.get(&doc.id))
                .ok_or_else(|| StoreError::NotFound(format!("{}/{}", doc.collection, doc.id)))?;
            if let Some((field, expected)) = guard {
                if field_as_text(current, field).as_deref() != Some(expected.as_str()) {
                    return Err(StoreError::Conflict(format!(
                        "{}/{}: {field} is no longer '{expected}'",
                        doc.collection, doc.id
                    )));
                }
            }
        }

        for op in ops {
            let (doc, data) = match op {
                WriteOp::Patch { doc, data } | WriteOp::PatchIf { doc, data, .. } => (doc, data),
            };
            if let Some(target) = collections
                .get_mut(&doc.collection)
                .and_then(|docs| docs.get_mut(&doc.id))
            {
                merge_patch(target, &data);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Object store
// ============================================================================

/// In-memory object store keyed by full object path.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
    fail_delete_keys: Mutex<HashSet<String>>,
    fail_uploads: Mutex<bool>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make deletion of one key fail, leaving the object in place.
    pub fn fail_delete(&self, key: &str) {
        lock(&self.fail_delete_keys).insert(key.to_string());
    }

    /// Make every upload fail (export publish failure path).
    pub fn fail_uploads(&self, fail: bool) {
        *lock(&self.fail_uploads) = fail;
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.objects).contains_key(key)
    }

    pub fn object_count(&self) -> usize {
        lock(&self.objects).len()
    }

    /// Raw bytes of a stored object, for archive assertions.
    pub fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects).get(key).map(|(bytes, _)| bytes.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        Ok(lock(&self.objects)
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (bytes, _))| ObjectMeta {
                key: key.clone(),
                size: bytes.len() as i64,
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(lock(&self.objects).get(key).map(|(bytes, _)| bytes.clone()))
    }

    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        if *lock(&self.fail_uploads) {
            return Err(StoreError::Backend("simulated upload outage".into()));
        }
        lock(&self.objects).insert(key.to_string(), (data, content_type.to_string()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if lock(&self.fail_delete_keys).contains(key) {
            return Err(StoreError::Backend(format!("simulated delete failure: {key}")));
        }
        lock(&self.objects).remove(key);
        Ok(())
    }

    async fn presign_get(&self, key: &str) -> Result<String, StoreError> {
        if !lock(&self.objects).contains_key(key) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(format!("https://storage.test/{key}?signature=stub"))
    }
}

// ============================================================================
// Warehouse
// ============================================================================

/// In-memory warehouse: event-type rows per user hash.
#[derive(Default)]
pub struct MemoryWarehouse {
    events: Mutex<HashMap<String, Vec<String>>>,
    table_missing: Mutex<bool>,
    fail_purge: Mutex<bool>,
}

impl MemoryWarehouse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_event(&self, user_hash: &str, event_type: &str) {
        lock(&self.events)
            .entry(user_hash.to_string())
            .or_default()
            .push(event_type.to_string());
    }

    /// Simulate the events table not existing at all.
    pub fn set_table_missing(&self, missing: bool) {
        *lock(&self.table_missing) = missing;
    }

    pub fn fail_purge(&self, fail: bool) {
        *lock(&self.fail_purge) = fail;
    }
}

#[async_trait]
impl AnalyticsWarehouse for MemoryWarehouse {
    async fn remaining_events(&self, user_hash: &str) -> Result<Vec<String>, StoreError> {
        if *lock(&self.table_missing) {
            return Err(StoreError::NotFound(
                "activity_events: relation does not exist".into(),
            ));
        }
        let mut types: Vec<String> = lock(&self.events)
            .get(user_hash)
            .cloned()
            .unwrap_or_default();
        types.sort();
        types.dedup();
        Ok(types)
    }

    async fn purge_user(&self, user_hash: &str) -> Result<u64, StoreError> {
        if *lock(&self.table_missing) {
            return Err(StoreError::NotFound(
                "activity_events: relation does not exist".into(),
            ));
        }
        if *lock(&self.fail_purge) {
            return Err(StoreError::Backend("simulated warehouse outage".into()));
        }
        Ok(lock(&self.events)
            .remove(user_hash)
            .map_or(0, |rows| rows.len() as u64))
    }
}

// ============================================================================
// Identity provider
// ============================================================================

/// In-memory identity provider.
#[derive(Default)]
pub struct MemoryIdentityProvider {
    accounts: Mutex<HashMap<String, IdentityAccount>>,
    fail_delete: Mutex<bool>,
}

impl MemoryIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_account(&self, user_id: &str, email: &str) {
        lock(&self.accounts).insert(
            user_id.to_string(),
            IdentityAccount {
                user_id: user_id.to_string(),
                email: Some(email.to_string()),
            },
        );
    }

    pub fn fail_delete(&self, fail: bool) {
        *lock(&self.fail_delete) = fail;
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn get_user(&self, user_id: &str) -> Result<Option<IdentityAccount>, StoreError> {
        Ok(lock(&self.accounts).get(user_id).cloned())
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), StoreError> {
        if *lock(&self.fail_delete) {
            return Err(StoreError::Backend("simulated identity outage".into()));
        }
        match lock(&self.accounts).remove(user_id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("identity account {user_id}"))),
        }
    }
}

// ============================================================================
// Billing processor
// ============================================================================

/// In-memory billing processor mapping user ids to customer records.
#[derive(Default)]
pub struct MemoryBillingProcessor {
    customers: Mutex<HashMap<String, String>>,
    fail_delete: Mutex<bool>,
}

impl MemoryBillingProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_customer(&self, user_id: &str, customer_id: &str) {
        lock(&self.customers).insert(user_id.to_string(), customer_id.to_string());
    }

    pub fn fail_delete(&self, fail: bool) {
        *lock(&self.fail_delete) = fail;
    }

    pub fn customer_count(&self) -> usize {
        lock(&self.customers).len()
    }
}

#[async_trait]
impl BillingProcessor for MemoryBillingProcessor {
    async fn find_customer_id(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.customers).get(user_id).cloned())
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<(), StoreError> {
        if *lock(&self.fail_delete) {
            return Err(StoreError::Backend("simulated billing outage".into()));
        }
        let mut customers = lock(&self.customers);
        let key = customers
            .iter()
            .find(|(_, cid)| cid.as_str() == customer_id)
            .map(|(uid, _)| uid.clone());
        match key {
            Some(uid) => {
                customers.remove(&uid);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("billing customer {customer_id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn update_with_null_clears_the_field() {
        let store = MemoryDocumentStore::new();
        store
            .set("settings", "u1", json!({"user_id": "u1", "filter": "cycling"}))
            .await
            .unwrap();

        store
            .update("settings", "u1", json!({"filter": null}))
            .await
            .unwrap();

        let doc = store.get("settings", "u1").await.unwrap().unwrap();
        assert!(doc.data.get("filter").is_none(), "null patch must unset");
        assert_eq!(doc.data["user_id"], "u1");
    }

    #[tokio::test]
    async fn create_is_write_once() {
        let store = MemoryDocumentStore::new();
        store
            .create("webhook_events", "evt_1", json!({"status": "success"}))
            .await
            .unwrap();
        let err = store
            .create("webhook_events", "evt_1", json!({"status": "success"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn transact_guard_failure_applies_nothing() {
        let store = MemoryDocumentStore::new();
        store
            .set("deletion_requests", "r1", json!({"status": "processing"}))
            .await
            .unwrap();
        store
            .set("users", "u1", json!({"deletion_scheduled_at": "x"}))
            .await
            .unwrap();

        let err = store
            .transact(vec![
                WriteOp::PatchIf {
                    doc: DocRef::new("deletion_requests", "r1"),
                    guard_field: "status".into(),
                    expected: "scheduled".into(),
                    data: json!({"status": "cancelled"}),
                },
                WriteOp::Patch {
                    doc: DocRef::new("users", "u1"),
                    data: json!({"deletion_scheduled_at": null}),
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // The unguarded patch must not have been applied either.
        let user = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(user.data["deletion_scheduled_at"], "x");
    }

    #[tokio::test]
    async fn query_before_and_order() {
        let store = MemoryDocumentStore::new();
        store
            .set("recovery_codes", "a", json!({"email": "x@y.z", "status": "pending", "created_at": "2026-08-01T00:00:00Z"}))
            .await
            .unwrap();
        store
            .set("recovery_codes", "b", json!({"email": "x@y.z", "status": "pending", "created_at": "2026-08-02T00:00:00Z"}))
            .await
            .unwrap();

        let latest = store
            .query(
                "recovery_codes",
                &[FieldFilter::eq("email", "x@y.z")],
                QueryOptions::latest_first("created_at").with_limit(1),
            )
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, "b");

        let due = store
            .query(
                "recovery_codes",
                &[FieldFilter::before(
                    "created_at",
                    "2026-08-01T12:00:00Z".parse().unwrap(),
                )],
                QueryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "a");
    }
}
