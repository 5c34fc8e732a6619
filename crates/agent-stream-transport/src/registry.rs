//! Discovery of live sessions.

use std::sync::Arc;

use agent_stream_core::{LogStore, SessionKey, StreamConfig};
use futures::{StreamExt, stream::BoxStream};

use crate::StreamError;

/// Finds sessions whose liveness flag is currently set.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn LogStore>,
    config: Arc<StreamConfig>,
}

impl SessionRegistry {
    /// Create a registry over a store.
    #[must_use]
    pub fn new(store: Arc<dyn LogStore>, config: Arc<StreamConfig>) -> Self {
        Self { store, config }
    }

    /// Live sessions, optionally restricted to a scope and/or user.
    ///
    /// The scan runs when the stream is first polled and reflects that
    /// moment only; sessions starting or stopping meanwhile may or may not
    /// appear. Keys that do not decode are skipped. The scan pattern can
    /// over-match session ids containing `:`, so decoded keys are checked
    /// against the requested scope and user again.
    #[must_use]
    pub fn query(
        &self,
        scope_id: Option<i64>,
        user_id: Option<i64>,
    ) -> BoxStream<'static, Result<SessionKey, StreamError>> {
        let store = Arc::clone(&self.store);
        let namespace = self.config.namespace.clone();
        let pattern = SessionKey::scan_pattern(&namespace, scope_id, user_id);

        futures::stream::once(async move {
            let found: Vec<Result<SessionKey, StreamError>> = match store.scan(&pattern).await {
                Ok(keys) => keys
                    .into_iter()
                    .filter_map(|key| {
                        let decoded = SessionKey::from_live_key(&namespace, &key);
                        if decoded.is_none() {
                            tracing::warn!(key = %key, "Skipping undecodable liveness key");
                        }
                        decoded
                    })
                    .filter(|key| {
                        scope_id.is_none_or(|id| key.scope_id == id)
                            && user_id.is_none_or(|id| key.user_id == id)
                    })
                    .map(Ok)
                    .collect(),
                Err(e) => vec![Err(e.into())],
            };
            found
        })
        .flat_map(futures::stream::iter)
        .boxed()
    }
}
