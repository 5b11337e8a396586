//! Structured Document Store
//!
//! Collection-of-JSON-documents abstraction. Besides holding the user data
//! collections that deletion and export operate on, it is the persistence
//! layer for every control-plane entity (deletion requests, recovery codes,
//! certificates, webhook event records, audit logs).
//!
//! Patch semantics: `update` merges shallowly and an explicit JSON `null`
//! *clears* the stored field. Callers that want to keep a field simply omit
//! it from the patch.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use super::{DocRef, Document, FieldFilter, QueryOptions, StoreError, WriteOp};

/// Structured document store collaborator.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document, `None` when absent.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Create or fully replace a document.
    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError>;

    /// Write-once create. Fails with [`StoreError::Conflict`] if the id
    /// already exists; the idempotency guard is built on this.
    async fn create(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError>;

    /// Shallow merge-patch an existing document (`null` clears a field).
    /// [`StoreError::NotFound`] when the document is absent.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError>;

    /// Query a collection by field predicates.
    async fn query(
        &self,
        collection: &str,
        filters: &[FieldFilter],
        opts: QueryOptions,
    ) -> Result<Vec<Document>, StoreError>;

    /// Delete the referenced documents; absent refs are not an error.
    /// Returns how many documents actually existed.
    async fn batch_delete(&self, refs: &[DocRef]) -> Result<u64, StoreError>;

    /// Apply a write batch atomically. A failed `PatchIf` guard aborts the
    /// whole batch with [`StoreError::Conflict`].
    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Guarded single-document transition: patch only if `guard_field`
    /// still equals `expected`. Returns whether this caller won the write.
    /// This is the single-writer election used by the deletion sweep.
    async fn cas_update(
        &self,
        doc: DocRef,
        guard_field: &str,
        expected: &str,
        patch: Value,
    ) -> Result<bool, StoreError> {
        match self
            .transact(vec![WriteOp::PatchIf {
                doc,
                guard_field: guard_field.to_string(),
                expected: expected.to_string(),
                data: patch,
            }])
            .await
        {
            Ok(()) => Ok(true),
            Err(StoreError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Postgres-backed document store.
///
/// One `documents` table keyed by `(collection, id)` with a JSONB body.
/// Field predicates address `data->>'field'`; timestamp predicates cast to
/// `timestamptz` so RFC 3339 values with differing precision compare
/// correctly.
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                 collection TEXT NOT NULL,
                 id TEXT NOT NULL,
                 data JSONB NOT NULL,
                 updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                 PRIMARY KEY (collection, id)
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_user_id
             ON documents (collection, (data->>'user_id'))",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Build the WHERE tail and bind arguments for a filter list, with
    /// placeholders numbered from `first_placeholder`.
    fn filter_sql(filters: &[FieldFilter], first_placeholder: usize) -> (String, Vec<String>) {
        let mut sql = String::new();
        let mut binds = Vec::new();
        let mut n = first_placeholder;
        for filter in filters {
            match filter {
                FieldFilter::Eq { field, value } => {
                    sql.push_str(&format!(" AND data->>'{}' = ${n}", sanitize_field(field)));
                    binds.push(value.clone());
                }
                FieldFilter::Before { field, instant } => {
                    sql.push_str(&format!(
                        " AND (data->>'{}')::timestamptz < ${n}::timestamptz",
                        sanitize_field(field)
                    ));
                    binds.push(instant.to_rfc3339());
                }
            }
            n += 1;
        }
        (sql, binds)
    }
}

/// Field names are compile-time constants throughout this crate, but they
/// are interpolated into SQL, so restrict them to identifier characters.
fn sanitize_field(field: &str) -> String {
    field
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT data FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(data,)| Document {
            id: id.to_string(),
            data,
        }))
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3)
             ON CONFLICT (collection, id)
             DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()",
        )
        .bind(collection)
        .bind(id)
        .bind(data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO documents (collection, id, data) VALUES ($1, $2, $3)
             ON CONFLICT (collection, id) DO NOTHING",
        )
        .bind(collection)
        .bind(id)
        .bind(data)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("{collection}/{id} already exists")));
        }
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        // `||` merges shallowly; strip_nulls turns an explicit null patch
        // field into a cleared field rather than a stored null.
        let result = sqlx::query(
            "UPDATE documents
             SET data = jsonb_strip_nulls(data || $3::jsonb), updated_at = NOW()
             WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .bind(patch)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("{collection}/{id}")));
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[FieldFilter],
        opts: QueryOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let (where_tail, binds) = Self::filter_sql(filters, 2);
        let mut sql =
            format!("SELECT id, data FROM documents WHERE collection = $1{where_tail}");

        if let Some(order_field) = &opts.order_by_desc {
            sql.push_str(&format!(
                " ORDER BY (data->>'{}')::timestamptz DESC",
                sanitize_field(order_field)
            ));
        }
        if let Some(limit) = opts.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, (String, Value)>(&sql).bind(collection);
        for bind in binds {
            q = q.bind(bind);
        }

        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(id, data)| Document { id, data })
            .collect())
    }

    async fn batch_delete(&self, refs: &[DocRef]) -> Result<u64, StoreError> {
        if refs.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;
        for doc in refs {
            let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                .bind(&doc.collection)
                .bind(&doc.id)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }
        tx.commit().await?;

        Ok(deleted)
    }

    async fn transact(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for op in ops {
            match op {
                WriteOp::Patch { doc, data } => {
                    let result = sqlx::query(
                        "UPDATE documents
                         SET data = jsonb_strip_nulls(data || $3::jsonb), updated_at = NOW()
                         WHERE collection = $1 AND id = $2",
                    )
                    .bind(&doc.collection)
                    .bind(&doc.id)
                    .bind(data)
                    .execute(&mut *tx)
                    .await?;

                    if result.rows_affected() == 0 {
                        tx.rollback().await.ok();
                        return Err(StoreError::NotFound(format!(
                            "{}/{}",
                            doc.collection, doc.id
                        )));
                    }
                }
                WriteOp::PatchIf {
                    doc,
                    guard_field,
                    expected,
                    data,
                } => {
                    let sql = format!(
                        "UPDATE documents
                         SET data = jsonb_strip_nulls(data || $3::jsonb), updated_at = NOW()
                         WHERE collection = $1 AND id = $2 AND data->>'{}' = $4",
                        sanitize_field(&guard_field)
                    );
                    let result = sqlx::query(&sql)
                        .bind(&doc.collection)
                        .bind(&doc.id)
                        .bind(data)
                        .bind(&expected)
                        .execute(&mut *tx)
                        .await?;

                    if result.rows_affected() == 0 {
                        tx.rollback().await.ok();
                        return Err(StoreError::Conflict(format!(
                            "{}/{}: {guard_field} is no longer '{expected}'",
                            doc.collection, doc.id
                        )));
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_field_strips_sql_metacharacters() {
        assert_eq!(sanitize_field("user_id"), "user_id");
        assert_eq!(sanitize_field("status'; DROP TABLE--"), "statusDROPTABLE");
    }
}
