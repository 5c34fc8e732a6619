//! Log store abstraction.

use std::{collections::BTreeMap, fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Field-set stored in one log entry.
pub type Fields = BTreeMap<String, String>;

/// Identifier of a log entry.
///
/// Identifiers increase monotonically; [`EntryId::START`] sorts before every
/// real entry and is the cursor for "read from the beginning".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl EntryId {
    /// Cursor positioned before the first entry.
    pub const START: Self = Self(0);

    /// Whether this is the start cursor.
    #[must_use]
    pub const fn is_start(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One appended entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub fields: Fields,
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid key pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Ordered append-only logs plus plain string keys, all expirable.
///
/// Modelled on a Redis-like server: logs behave like streams
/// (`XADD`/`XREAD`/`XRANGE`), flags like string keys
/// (`SET`/`GET`/`GETDEL`/`DEL`), and any key may carry a TTL.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append an entry to the log at `key`, creating it if needed.
    async fn append(&self, key: &str, fields: Fields) -> Result<EntryId, StoreError>;

    /// Entries of `key` with an id greater than `after`.
    ///
    /// Waits up to `block` for at least one entry to arrive and returns an
    /// empty batch when none did. A zero `block` never waits.
    async fn read_after(
        &self,
        key: &str,
        after: EntryId,
        block: Duration,
    ) -> Result<Vec<LogEntry>, StoreError>;

    /// Every entry of `key`, oldest first.
    async fn range(&self, key: &str) -> Result<Vec<LogEntry>, StoreError>;

    /// Set a string value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Get a string value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically get and delete a string value.
    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete any key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Expire any key after `ttl`. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remaining lifetime of a key, `None` if it is missing or persistent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Keys matching a glob pattern (`*`, `?`, `[..]`).
    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
}
