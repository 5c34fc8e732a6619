//! SQLite history storage (feature-gated).

use std::str::FromStr;

use agent_stream_core::SessionKey;
use async_trait::async_trait;
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};

use super::{HistoryStorage, SessionRecord, StorageError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS sessions (
    scope_id   INTEGER NOT NULL,
    user_id    INTEGER NOT NULL,
    session_id TEXT    NOT NULL,
    title      TEXT    NOT NULL,
    history    BLOB    NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (scope_id, user_id, session_id)
)";

/// SQLite storage implementation.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Connect to a database, creating the file and schema if missing.
    ///
    /// # Errors
    /// Returns error if database connection fails.
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Use an existing pool, creating the schema if missing.
    ///
    /// # Errors
    /// Returns error if the schema cannot be created.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

fn record_from_row(row: &SqliteRow) -> Result<SessionRecord, StorageError> {
    Ok(SessionRecord {
        key: SessionKey::new(
            row.try_get("scope_id")?,
            row.try_get("user_id")?,
            row.try_get::<String, _>("session_id")?,
        ),
        title: row.try_get("title")?,
        history: row.try_get("history")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl HistoryStorage for SqliteStorage {
    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT scope_id, user_id, session_id, title, history, updated_at
             FROM sessions WHERE scope_id = ?1 AND user_id = ?2 AND session_id = ?3",
        )
        .bind(key.scope_id)
        .bind(key.user_id)
        .bind(&key.session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn put(&self, record: SessionRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO sessions (scope_id, user_id, session_id, title, history, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (scope_id, user_id, session_id) DO UPDATE SET
                 title = excluded.title,
                 history = excluded.history,
                 updated_at = excluded.updated_at",
        )
        .bind(record.key.scope_id)
        .bind(record.key.user_id)
        .bind(&record.key.session_id)
        .bind(&record.title)
        .bind(&record.history)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE scope_id = ?1 AND user_id = ?2 AND session_id = ?3",
        )
        .bind(key.scope_id)
        .bind(key.user_id)
        .bind(&key.session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        scope_id: Option<i64>,
        user_id: Option<i64>,
    ) -> Result<Vec<SessionRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT scope_id, user_id, session_id, title, history, updated_at
             FROM sessions
             WHERE (?1 IS NULL OR scope_id = ?1) AND (?2 IS NULL OR user_id = ?2)
             ORDER BY updated_at DESC, scope_id, user_id, session_id",
        )
        .bind(scope_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}
