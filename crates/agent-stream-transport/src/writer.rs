//! Appending envelopes to a session log.

use std::{sync::Arc, time::Duration};

use agent_stream_core::{
    Envelope, EnvelopeType, LogStore, SessionKey, StreamConfig, traits::EntryId,
};
use serde_json::{Value, json};

use crate::StreamError;

const LIVE_VALUE: &str = "1";

/// Writes a session's envelopes and owns its liveness flag.
///
/// Appends are independent; nothing groups several envelopes atomically.
/// One writer per session is assumed.
#[derive(Clone)]
pub struct StreamWriter {
    store: Arc<dyn LogStore>,
    config: Arc<StreamConfig>,
}

impl StreamWriter {
    /// Create a writer over a store.
    #[must_use]
    pub fn new(store: Arc<dyn LogStore>, config: Arc<StreamConfig>) -> Self {
        Self { store, config }
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &Arc<StreamConfig> {
        &self.config
    }

    /// Mark the session live and append its `begin` envelope.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn start(&self, key: &SessionKey) -> Result<(), StreamError> {
        self.store
            .set(&key.live_key(&self.config.namespace), LIVE_VALUE)
            .await?;
        self.add(
            key,
            EnvelopeType::Begin,
            &self.config.origin,
            Some(json!({ "session_id": key.session_id })),
        )
        .await?;
        tracing::info!(session = %key, "Stream started");
        Ok(())
    }

    /// [`stop_with_grace`](Self::stop_with_grace) using the configured grace period.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn stop(&self, key: &SessionKey) -> Result<(), StreamError> {
        self.stop_with_grace(key, self.config.grace_period).await
    }

    /// Append `end`, clear the liveness flag and let the log expire after
    /// `grace_period`.
    ///
    /// Call this on every run outcome, otherwise listeners wait until their
    /// idle timeout. All three steps are attempted even if an earlier one
    /// fails, so a failed `end` append never leaves the flag set.
    ///
    /// # Errors
    /// Returns the first store failure.
    pub async fn stop_with_grace(
        &self,
        key: &SessionKey,
        grace_period: Duration,
    ) -> Result<(), StreamError> {
        let ended = self
            .add(key, EnvelopeType::End, &self.config.origin, None)
            .await;
        let cleared = self
            .store
            .delete(&key.live_key(&self.config.namespace))
            .await;
        let expired = self
            .store
            .expire(&key.log_key(&self.config.namespace), grace_period)
            .await;
        ended?;
        cleared?;
        expired?;
        tracing::info!(session = %key, grace_secs = grace_period.as_secs(), "Stream stopped");
        Ok(())
    }

    /// Append one envelope.
    ///
    /// A `None` body leaves the `body` field out entirely.
    ///
    /// # Errors
    /// Returns error if the body cannot be encoded or the store fails.
    pub async fn add(
        &self,
        key: &SessionKey,
        kind: EnvelopeType,
        origin: &str,
        body: Option<Value>,
    ) -> Result<EntryId, StreamError> {
        let fields = Envelope::new(kind, origin, body).to_fields()?;
        let id = self
            .store
            .append(&key.log_key(&self.config.namespace), fields)
            .await?;
        tracing::debug!(session = %key, %kind, %id, "Envelope appended");
        Ok(id)
    }

    /// Request early termination by clearing the liveness flag.
    ///
    /// Returns whether the session was live. Appends nothing: the producer
    /// notices via [`is_live`](Self::is_live) and stops itself.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn cancel(&self, key: &SessionKey) -> Result<bool, StreamError> {
        let was_live = self
            .store
            .get_del(&key.live_key(&self.config.namespace))
            .await?
            .is_some();
        if was_live {
            tracing::info!(session = %key, "Stream cancelled");
        }
        Ok(was_live)
    }

    /// Whether the liveness flag is present.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn is_live(&self, key: &SessionKey) -> Result<bool, StreamError> {
        Ok(self
            .store
            .get(&key.live_key(&self.config.namespace))
            .await?
            .is_some())
    }
}
