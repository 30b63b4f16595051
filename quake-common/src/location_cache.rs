use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use crate::event::CoordinateKey;
use crate::store::{StoreError, StoreResult};

/// A memoized reverse geocoding result.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct LocationCacheEntry {
    pub coordinate_key: String,
    pub place_name: String,
    pub resolved_at: DateTime<Utc>,
}

/// Persistent cache of place names, keyed by quantized coordinates.
#[derive(Clone)]
pub struct LocationCache {
    pool: SqlitePool,
}

impl LocationCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &CoordinateKey) -> StoreResult<Option<String>> {
        Ok(self.entry(key).await?.map(|entry| entry.place_name))
    }

    pub async fn entry(&self, key: &CoordinateKey) -> StoreResult<Option<LocationCacheEntry>> {
        sqlx::query_as(
            r#"
SELECT
    coordinate_key, place_name, resolved_at
FROM
    location_cache
WHERE
    coordinate_key = ?
            "#,
        )
        .bind(key.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })
    }

    /// Upsert a place name for `key`. Lookups are deterministic per key, so overwriting an
    /// existing entry only refreshes `resolved_at`.
    pub async fn put(&self, key: &CoordinateKey, place_name: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
INSERT INTO location_cache
    (coordinate_key, place_name, resolved_at)
VALUES
    (?, ?, ?)
ON CONFLICT (coordinate_key) DO UPDATE SET
    place_name = excluded.place_name,
    resolved_at = excluded.resolved_at
            "#,
        )
        .bind(key.to_string())
        .bind(place_name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        Ok(())
    }

    pub async fn len(&self) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM location_cache")
            .fetch_one(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        Ok(count)
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }
}
