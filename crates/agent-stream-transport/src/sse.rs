//! Server-sent events adapter for listeners.

use agent_stream_core::SessionKey;
use axum::response::sse::Event;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};

use crate::{
    StreamError,
    listener::{ListenItem, ListenOptions, SessionListener},
    protocol::SerializedEnvelope,
};

impl SessionListener {
    /// Listen and render every envelope as an SSE event.
    ///
    /// The event name is the envelope type and the data is the JSON text of
    /// the [`SerializedEnvelope`], regardless of `options.serialize`.
    #[must_use]
    pub fn sse_stream(
        &self,
        key: &SessionKey,
        options: ListenOptions,
    ) -> BoxStream<'static, Result<Event, StreamError>> {
        self.listen(key, options.serialize(false))
            .and_then(|item| async move { to_sse_event(item) })
            .boxed()
    }
}

fn to_sse_event(item: ListenItem) -> Result<Event, StreamError> {
    let (name, data) = match item {
        ListenItem::Envelope(envelope) => {
            let wrapper = SerializedEnvelope::encode(&envelope)?;
            (envelope.kind.as_str(), wrapper.to_json()?)
        }
        ListenItem::Serialized(json) => {
            let wrapper = SerializedEnvelope::from_json(&json)?;
            (wrapper.kind.as_str(), json)
        }
    };
    Ok(Event::default().event(name).data(data))
}
