//! Relay configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "agx";
/// Default origin for envelopes produced by the relay itself.
pub const DEFAULT_ORIGIN: &str = "opale";
/// Default origin for envelopes reassembled from agent framework events.
pub const DEFAULT_FRAMEWORK_ORIGIN: &str = "pydantic-ai";

/// Configuration shared by the writer, listener, registry and reassembler.
///
/// Built once and passed to constructors; nothing reads it from a global.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Prefix of every log and liveness key.
    pub namespace: String,

    /// Origin stamped on `begin`, `end`, `error` and `info` envelopes.
    pub origin: String,

    /// Origin stamped on reassembled `event` envelopes.
    pub framework_origin: String,

    /// Length of one blocking read performed by listeners.
    #[serde(with = "millis")]
    pub poll_interval: Duration,

    /// How long a log survives after `stop`.
    #[serde(with = "secs")]
    pub grace_period: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            framework_origin: DEFAULT_FRAMEWORK_ORIGIN.to_string(),
            poll_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(5),
        }
    }
}

impl StreamConfig {
    /// Create a configuration with a custom namespace.
    #[must_use]
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Override the listener poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Override the post-stop grace period.
    #[must_use]
    pub const fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Defaults overlaid with `AGENT_STREAM_*` environment variables.
    ///
    /// Unparseable numeric values are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(namespace) = lookup("AGENT_STREAM_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(origin) = lookup("AGENT_STREAM_ORIGIN") {
            config.origin = origin;
        }
        if let Some(origin) = lookup("AGENT_STREAM_FRAMEWORK_ORIGIN") {
            config.framework_origin = origin;
        }
        if let Some(raw) = lookup("AGENT_STREAM_POLL_INTERVAL_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => config.poll_interval = Duration::from_millis(ms),
                Err(e) => tracing::warn!("Ignoring AGENT_STREAM_POLL_INTERVAL_MS={raw}: {e}"),
            }
        }
        if let Some(raw) = lookup("AGENT_STREAM_GRACE_PERIOD_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) => config.grace_period = Duration::from_secs(secs),
                Err(e) => tracing::warn!("Ignoring AGENT_STREAM_GRACE_PERIOD_SECS={raw}: {e}"),
            }
        }
        config
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
