//! In-memory history storage.

use std::{collections::HashMap, sync::RwLock};

use agent_stream_core::SessionKey;
use async_trait::async_trait;

use super::{HistoryStorage, SessionRecord, StorageError};

/// In-memory storage implementation.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
pub struct MemoryStorage {
    sessions: RwLock<HashMap<SessionKey, SessionRecord>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStorage for MemoryStorage {
    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>, StorageError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(key)
            .cloned())
    }

    async fn put(&self, record: SessionRecord) -> Result<(), StorageError> {
        self.sessions
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, StorageError> {
        Ok(self
            .sessions
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .remove(key)
            .is_some())
    }

    async fn list(
        &self,
        scope_id: Option<i64>,
        user_id: Option<i64>,
    ) -> Result<Vec<SessionRecord>, StorageError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let mut result: Vec<SessionRecord> = sessions
            .values()
            .filter(|r| scope_id.is_none_or(|id| r.key.scope_id == id))
            .filter(|r| user_id.is_none_or(|id| r.key.user_id == id))
            .cloned()
            .collect();

        // Most recent first, ties by key for a stable order
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.key.cmp(&b.key)));

        Ok(result)
    }
}
