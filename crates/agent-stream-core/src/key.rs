//! Session identity and key layout.

use std::fmt;

use serde::{Deserialize, Serialize};

const LIVE_SUFFIX: &str = "live";

/// Identifies one streamed session.
///
/// The same key addresses the session log (`{ns}:{scope}:{user}:{session}`)
/// and its liveness flag (`{ns}:{scope}:{user}:{session}:live`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub scope_id: i64,
    pub user_id: i64,
    pub session_id: String,
}

impl SessionKey {
    /// Create a session key.
    #[must_use]
    pub fn new(scope_id: i64, user_id: i64, session_id: impl Into<String>) -> Self {
        Self {
            scope_id,
            user_id,
            session_id: session_id.into(),
        }
    }

    /// Create a key with a freshly generated session id.
    #[must_use]
    pub fn generate(scope_id: i64, user_id: i64) -> Self {
        Self::new(scope_id, user_id, uuid::Uuid::new_v4().to_string())
    }

    /// Key of the session log.
    #[must_use]
    pub fn log_key(&self, namespace: &str) -> String {
        format!(
            "{namespace}:{}:{}:{}",
            self.scope_id, self.user_id, self.session_id
        )
    }

    /// Key of the liveness flag.
    #[must_use]
    pub fn live_key(&self, namespace: &str) -> String {
        format!("{}:{LIVE_SUFFIX}", self.log_key(namespace))
    }

    /// Glob matching the liveness keys of every session under the given
    /// scope and user. `None` matches any value.
    #[must_use]
    pub fn scan_pattern(namespace: &str, scope_id: Option<i64>, user_id: Option<i64>) -> String {
        let scope = scope_id.map_or_else(|| "*".to_string(), |id| id.to_string());
        let user = user_id.map_or_else(|| "*".to_string(), |id| id.to_string());
        format!("{namespace}:{scope}:{user}:*:{LIVE_SUFFIX}")
    }

    /// Decode a liveness key back into a session key.
    ///
    /// Session ids may themselves contain `:`.
    #[must_use]
    pub fn from_live_key(namespace: &str, key: &str) -> Option<Self> {
        let rest = key
            .strip_prefix(namespace)?
            .strip_prefix(':')?
            .strip_suffix(LIVE_SUFFIX)?
            .strip_suffix(':')?;

        let mut fields = rest.splitn(3, ':');
        let scope_id = fields.next()?.parse().ok()?;
        let user_id = fields.next()?.parse().ok()?;
        let session_id = fields.next()?;
        if session_id.is_empty() {
            return None;
        }
        Some(Self::new(scope_id, user_id, session_id))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.scope_id, self.user_id, self.session_id)
    }
}
