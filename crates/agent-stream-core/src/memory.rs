//! In-process log store.

use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::Instant,
};

use crate::traits::{EntryId, Fields, LogEntry, LogStore, StoreError};

#[derive(Default)]
struct Inner {
    logs: HashMap<String, Vec<LogEntry>>,
    values: HashMap<String, String>,
    expiries: HashMap<String, Instant>,
    last_id: u64,
}

impl Inner {
    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .expiries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        self.expiries.remove(key);
        let log = self.logs.remove(key).is_some();
        let value = self.values.remove(key).is_some();
        log || value
    }

    fn contains(&self, key: &str) -> bool {
        self.logs.contains_key(key) || self.values.contains_key(key)
    }

    fn entries_after(&self, key: &str, after: EntryId) -> Vec<LogEntry> {
        self.logs
            .get(key)
            .map(|log| {
                let start = log.partition_point(|entry| entry.id <= after);
                log[start..].to_vec()
            })
            .unwrap_or_default()
    }
}

/// Log store kept in process memory.
///
/// Suitable for tests, demos and single-process deployments. Expiry is
/// enforced lazily on access using the tokio clock, so paused-time tests can
/// advance past a TTL. Blocked readers are woken by a broadcast of the keys
/// that received entries.
pub struct MemoryLogStore {
    inner: RwLock<Inner>,
    appended: broadcast::Sender<String>,
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLogStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (appended, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner::default()),
            appended,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))
    }

    /// Write access with expired keys already purged.
    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        inner.purge_expired(Instant::now());
        Ok(inner)
    }

    fn is_expired(inner: &Inner, key: &str) -> bool {
        inner
            .expiries
            .get(key)
            .is_some_and(|deadline| *deadline <= Instant::now())
    }

    fn snapshot_after(&self, key: &str, after: EntryId) -> Result<Vec<LogEntry>, StoreError> {
        let inner = self.read()?;
        if Self::is_expired(&inner, key) {
            return Ok(Vec::new());
        }
        Ok(inner.entries_after(key, after))
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, key: &str, fields: Fields) -> Result<EntryId, StoreError> {
        let id = {
            let mut inner = self.write()?;
            inner.last_id += 1;
            let id = EntryId(inner.last_id);
            inner
                .logs
                .entry(key.to_string())
                .or_default()
                .push(LogEntry { id, fields });
            id
        };
        // Nobody blocked is fine.
        let _ = self.appended.send(key.to_string());
        Ok(id)
    }

    async fn read_after(
        &self,
        key: &str,
        after: EntryId,
        block: Duration,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let deadline = Instant::now() + block;
        // Subscribe before looking so an append in between still wakes us.
        let mut rx = self.appended.subscribe();

        loop {
            let entries = self.snapshot_after(key, after)?;
            if !entries.is_empty() {
                return Ok(entries);
            }

            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Ok(_) | Err(RecvError::Lagged(_))) => {}
                Ok(Err(RecvError::Closed)) | Err(_) => return Ok(Vec::new()),
            }
        }
    }

    async fn range(&self, key: &str) -> Result<Vec<LogEntry>, StoreError> {
        self.snapshot_after(key, EntryId::START)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        inner.expiries.remove(key);
        inner.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.read()?;
        if Self::is_expired(&inner, key) {
            return Ok(None);
        }
        Ok(inner.values.get(key).cloned())
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.write()?;
        let value = inner.values.remove(key);
        if value.is_some() {
            inner.expiries.remove(key);
        }
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.write()?.remove(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        if !inner.contains(key) {
            return Ok(false);
        }
        inner.expiries.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let inner = self.read()?;
        let now = Instant::now();
        Ok(inner
            .expiries
            .get(key)
            .filter(|deadline| **deadline > now)
            .map(|deadline| deadline.duration_since(now)))
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let matcher = glob::Pattern::new(pattern).map_err(|e| StoreError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let inner = self.write()?;
        let mut keys: Vec<String> = inner
            .logs
            .keys()
            .chain(inner.values.keys())
            .filter(|key| matcher.matches(key))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
