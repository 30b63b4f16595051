use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

use crate::event::{Event, NewEvent};

/// Enumeration of errors for operations with the SQLite backed stores.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Open a pool against `url`, creating the database file if it does not exist yet.
pub async fn connect(url: &str, max_connections: u32) -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|error| StoreError::ConnectionError { error })?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(|error| StoreError::ConnectionError { error })
}

/// Append-only store of ingested events, keyed by the feed's unique id.
#[derive(Clone)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Check whether an event with this id has been stored. Primary key lookup.
    pub async fn exists(&self, id: &str) -> StoreResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM events WHERE id = ? LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        Ok(row.is_some())
    }

    /// Store a new event, stamping its ingestion time, and return the stored value.
    /// Returns `None`, without touching the existing row, when the id is already stored.
    pub async fn persist(&self, event: &NewEvent) -> StoreResult<Option<Event>> {
        let ingested_at = Utc::now();
        let result = sqlx::query(
            r#"
INSERT INTO events
    (id, origin_time, latitude, longitude, magnitude, depth, region, place_name, ingested_at)
VALUES
    (?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&event.id)
        .bind(event.origin_time)
        .bind(event.latitude)
        .bind(event.longitude)
        .bind(event.magnitude)
        .bind(event.depth)
        .bind(&event.region)
        .bind(&event.place_name)
        .bind(ingested_at)
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(event.clone().into_event(ingested_at)))
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<Event>> {
        sqlx::query_as(
            r#"
SELECT
    id, origin_time, latitude, longitude, magnitude, depth, region, place_name, ingested_at
FROM
    events
WHERE
    id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })
    }

    /// The `limit` most recently ingested events, newest first.
    pub async fn recent(&self, limit: i64) -> StoreResult<Vec<Event>> {
        sqlx::query_as(
            r#"
SELECT
    id, origin_time, latitude, longitude, magnitude, depth, region, place_name, ingested_at
FROM
    events
ORDER BY
    ingested_at DESC,
    rowid DESC
LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "SELECT".to_owned(),
            error,
        })
    }

    pub async fn count(&self) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn new_event(id: &str) -> NewEvent {
        NewEvent {
            id: id.to_owned(),
            origin_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            latitude: 39.9,
            longitude: 32.8,
            magnitude: 4.5,
            depth: 10.0,
            region: "CENTRAL TURKEY".to_owned(),
            place_name: Some("Ankara, Türkiye".to_owned()),
        }
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_persist_and_read_back(db: SqlitePool) {
        let store = EventStore::new(db);
        let event = new_event("eq123");

        assert!(!store.exists("eq123").await.unwrap());

        let before = Utc::now();
        let persisted = store.persist(&event).await.unwrap().expect("event is new");
        let after = Utc::now();

        assert!(store.exists("eq123").await.unwrap());
        assert!(persisted.ingested_at >= before && persisted.ingested_at <= after);

        let stored = store.get("eq123").await.unwrap().expect("event was stored");
        assert_eq!(stored, persisted);
        assert_eq!(stored, event.into_event(stored.ingested_at));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_persist_is_idempotent(db: SqlitePool) {
        let store = EventStore::new(db);
        let event = new_event("eq123");

        assert!(store.persist(&event).await.unwrap().is_some());
        let first = store.get("eq123").await.unwrap().unwrap();

        let changed = event.clone().with_place_name(None);
        assert!(store.persist(&changed).await.unwrap().is_none());

        assert_eq!(store.count().await.unwrap(), 1);
        // The first write wins, the row is never updated.
        assert_eq!(store.get("eq123").await.unwrap().unwrap(), first);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_persist_without_place_name(db: SqlitePool) {
        let store = EventStore::new(db);
        let event = new_event("eq124").with_place_name(None);

        assert!(store.persist(&event).await.unwrap().is_some());

        let stored = store.get("eq124").await.unwrap().unwrap();
        assert_eq!(stored.place_name, None);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_recent_is_newest_first(db: SqlitePool) {
        let store = EventStore::new(db);

        for id in ["a", "b", "c"] {
            store.persist(&new_event(id)).await.unwrap();
        }

        let recent = store.recent(2).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|event| event.id.as_str()).collect();

        assert_eq!(ids, vec!["c", "b"]);
        assert_eq!(store.recent(10).await.unwrap().len(), 3);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_missing_event(db: SqlitePool) {
        let store = EventStore::new(db);

        assert!(store.get("nope").await.unwrap().is_none());
        assert!(store.recent(5).await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
