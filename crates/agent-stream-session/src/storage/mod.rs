//! Storage implementations.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use memory::MemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use agent_stream_core::{SessionKey, messages::ModelMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{History, Session, SessionError};

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Internal(String),
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persisted conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub key: SessionKey,
    /// First user prompt, for listings.
    pub title: String,
    /// JSON-encoded [`History`].
    pub history: Vec<u8>,
    /// Unix seconds of the last save.
    pub updated_at: i64,
}

/// Backend persisting session histories.
#[async_trait]
pub trait HistoryStorage: Send + Sync {
    /// Get a session by key.
    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>, StorageError>;

    /// Insert or replace a session.
    async fn put(&self, record: SessionRecord) -> Result<(), StorageError>;

    /// Delete a session. Returns whether it existed.
    async fn delete(&self, key: &SessionKey) -> Result<bool, StorageError>;

    /// Sessions matching the optional scope and user, most recent first.
    async fn list(
        &self,
        scope_id: Option<i64>,
        user_id: Option<i64>,
    ) -> Result<Vec<SessionRecord>, StorageError>;
}

pub(crate) fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// [`Session`] backed by a [`HistoryStorage`].
pub struct StoredSession {
    key: SessionKey,
    storage: Arc<dyn HistoryStorage>,
    history: History,
}

impl StoredSession {
    /// Create a session with an empty in-memory history. Call
    /// [`Session::load`] to fetch the persisted one.
    #[must_use]
    pub fn new(key: SessionKey, storage: Arc<dyn HistoryStorage>) -> Self {
        Self {
            key,
            storage,
            history: History::new(),
        }
    }

    #[must_use]
    pub const fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Messages currently held in memory.
    #[must_use]
    pub fn messages(&self) -> &[ModelMessage] {
        self.history.messages()
    }
}

#[async_trait]
impl Session for StoredSession {
    fn history(&self) -> &History {
        &self.history
    }

    fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    async fn load(&mut self) -> Result<(), SessionError> {
        self.history = match self.storage.get(&self.key).await? {
            Some(record) => History::from_json(&record.history)?,
            None => History::new(),
        };
        tracing::debug!(session = %self.key, messages = self.history.len(), "Session loaded");
        Ok(())
    }

    async fn save(&self) -> Result<(), SessionError> {
        let record = SessionRecord {
            key: self.key.clone(),
            title: self.history.user_prompt(),
            history: self.history.to_json()?,
            updated_at: now(),
        };
        self.storage.put(record).await?;
        tracing::debug!(session = %self.key, messages = self.history.len(), "Session saved");
        Ok(())
    }
}
