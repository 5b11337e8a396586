//! Analytics Warehouse
//!
//! De-identified activity events keyed by a one-way user hash. The warehouse
//! never stores the plaintext user id, which is why deletion here is
//! best-effort: the data is already de-identified.

use async_trait::async_trait;
use sqlx::PgPool;

use super::StoreError;

/// Rows removed per DELETE round trip, to avoid long-held table locks.
const PURGE_BATCH_SIZE: i64 = 10_000;

/// Analytics warehouse collaborator.
#[async_trait]
pub trait AnalyticsWarehouse: Send + Sync {
    /// Event types that still carry rows for the hashed user. Used by the
    /// deletion verifier; an empty list means clean. A missing events table
    /// surfaces as [`StoreError::NotFound`].
    async fn remaining_events(&self, user_hash: &str) -> Result<Vec<String>, StoreError>;

    /// Remove every row belonging to the hashed user. Returns rows removed.
    async fn purge_user(&self, user_hash: &str) -> Result<u64, StoreError>;
}

/// Postgres-backed warehouse over the `activity_events` table.
pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Postgres reports a missing relation as error code 42P01.
fn classify(e: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("42P01") {
            return StoreError::NotFound(format!("{what}: relation does not exist"));
        }
    }
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl AnalyticsWarehouse for PostgresWarehouse {
    async fn remaining_events(&self, user_hash: &str) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT event_type FROM activity_events WHERE user_hash = $1",
        )
        .bind(user_hash)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(e, "activity_events"))?;

        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    async fn purge_user(&self, user_hash: &str) -> Result<u64, StoreError> {
        let mut total: u64 = 0;
        loop {
            let result = sqlx::query(
                "DELETE FROM activity_events WHERE ctid IN (\
                     SELECT ctid FROM activity_events WHERE user_hash = $1 LIMIT $2\
                 )",
            )
            .bind(user_hash)
            .bind(PURGE_BATCH_SIZE)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "activity_events"))?;

            let deleted = result.rows_affected();
            total += deleted;
            if deleted < PURGE_BATCH_SIZE as u64 {
                break;
            }
        }
        Ok(total)
    }
}
