//! Bounded-wait subscription to a session log.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use agent_stream_core::{
    Envelope, EnvelopeType, LogStore, SessionKey, StreamConfig,
    traits::{EntryId, LogEntry},
};
use futures::{StreamExt, stream::BoxStream};

use crate::{StreamError, protocol::SerializedEnvelope};

/// Listen parameters.
///
/// `wait` and `timeout` count empty polls of one poll interval each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenOptions {
    /// Empty polls tolerated before anything has been read.
    pub wait: u32,
    /// Empty polls tolerated once something has been read.
    pub timeout: u32,
    /// Yield flat JSON wrappers instead of envelopes.
    pub serialize: bool,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            wait: 3,
            timeout: 60,
            serialize: true,
        }
    }
}

impl ListenOptions {
    #[must_use]
    pub const fn wait(mut self, wait: u32) -> Self {
        self.wait = wait;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: u32) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn serialize(mut self, serialize: bool) -> Self {
        self.serialize = serialize;
        self
    }
}

/// Item yielded by a listener.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenItem {
    /// Decoded envelope.
    Envelope(Envelope),
    /// JSON text of a [`SerializedEnvelope`].
    Serialized(String),
}

impl ListenItem {
    /// The envelope, if this item is not serialized.
    #[must_use]
    pub fn into_envelope(self) -> Option<Envelope> {
        match self {
            Self::Envelope(envelope) => Some(envelope),
            Self::Serialized(_) => None,
        }
    }

    /// The JSON text, if this item is serialized.
    #[must_use]
    pub fn as_serialized(&self) -> Option<&str> {
        match self {
            Self::Envelope(_) => None,
            Self::Serialized(json) => Some(json),
        }
    }
}

/// Opens listeners on session logs.
///
/// Every listener has its own cursor; any number may read the same log.
#[derive(Clone)]
pub struct SessionListener {
    store: Arc<dyn LogStore>,
    config: Arc<StreamConfig>,
}

impl SessionListener {
    /// Create a listener factory over a store.
    #[must_use]
    pub fn new(store: Arc<dyn LogStore>, config: Arc<StreamConfig>) -> Self {
        Self { store, config }
    }

    /// Stream the session's envelopes from the start of its log.
    ///
    /// Each pull blocks for at most one poll interval. The stream ends,
    /// without error, at the first `end` envelope (not yielded) or once the
    /// idle threshold from `options` is reached. Dropping the stream stops
    /// polling.
    #[must_use]
    pub fn listen(
        &self,
        key: &SessionKey,
        options: ListenOptions,
    ) -> BoxStream<'static, Result<ListenItem, StreamError>> {
        let cursor = Cursor {
            store: Arc::clone(&self.store),
            log_key: key.log_key(&self.config.namespace),
            poll_interval: self.config.poll_interval,
            options,
            last_id: EntryId::START,
            idle: 0,
            pending: VecDeque::new(),
            done: false,
        };

        futures::stream::unfold(cursor, |mut cursor| async move {
            let item = cursor.next_item().await?;
            Some((item, cursor))
        })
        .boxed()
    }
}

struct Cursor {
    store: Arc<dyn LogStore>,
    log_key: String,
    poll_interval: Duration,
    options: ListenOptions,
    last_id: EntryId,
    idle: u32,
    pending: VecDeque<LogEntry>,
    done: bool,
}

impl Cursor {
    async fn next_item(&mut self) -> Option<Result<ListenItem, StreamError>> {
        loop {
            if self.done {
                return None;
            }

            if let Some(entry) = self.pending.pop_front() {
                let envelope = match Envelope::from_fields(&entry.fields) {
                    Ok(envelope) => envelope,
                    Err(e) => return Some(Err(self.fail(e.into()))),
                };
                if envelope.kind == EnvelopeType::End {
                    tracing::debug!(log = %self.log_key, "Listener reached end");
                    self.done = true;
                    return None;
                }
                return Some(self.render(envelope));
            }

            let batch = match self
                .store
                .read_after(&self.log_key, self.last_id, self.poll_interval)
                .await
            {
                Ok(batch) => batch,
                Err(e) => return Some(Err(self.fail(e.into()))),
            };

            if let Some(last) = batch.last() {
                self.idle = 0;
                self.last_id = last.id;
                self.pending.extend(batch);
                continue;
            }

            self.idle += 1;
            let threshold = if self.last_id.is_start() {
                self.options.wait
            } else {
                self.options.timeout
            };
            if self.idle >= threshold {
                tracing::debug!(log = %self.log_key, idle = self.idle, "Listener idle, leaving");
                self.done = true;
            }
        }
    }

    fn render(&mut self, envelope: Envelope) -> Result<ListenItem, StreamError> {
        if !self.options.serialize {
            return Ok(ListenItem::Envelope(envelope));
        }
        SerializedEnvelope::encode(&envelope)
            .and_then(|wrapper| wrapper.to_json())
            .map(ListenItem::Serialized)
            .map_err(|e| self.fail(e))
    }

    fn fail(&mut self, error: StreamError) -> StreamError {
        self.done = true;
        error
    }
}

#[cfg(test)]
mod tests {
    use agent_stream_core::MemoryLogStore;
    use futures::TryStreamExt;
    use serde_json::json;
    use tokio::time::Instant;
    use tokio_test::assert_ok;

    use super::*;
    use crate::StreamWriter;

    fn setup() -> (Arc<MemoryLogStore>, StreamWriter, SessionListener) {
        let store = Arc::new(MemoryLogStore::new());
        let config = Arc::new(StreamConfig::default());
        let writer = StreamWriter::new(store.clone(), Arc::clone(&config));
        let listener = SessionListener::new(store.clone(), config);
        (store, writer, listener)
    }

    fn plain() -> ListenOptions {
        ListenOptions::default().wait(1).timeout(1).serialize(false)
    }

    async fn collect(
        listener: &SessionListener,
        key: &SessionKey,
        options: ListenOptions,
    ) -> Vec<ListenItem> {
        assert_ok!(listener.listen(key, options).try_collect().await)
    }

    #[tokio::test(start_paused = true)]
    async fn test_yields_added_sequence_until_end() {
        let (_, writer, listener) = setup();
        let key = SessionKey::new(42, 1, "8");
        assert_ok!(writer.start(&key).await);
        assert_ok!(
            writer
                .add(&key, EnvelopeType::Event, "test", Some(json!({"data": "hello"})))
                .await
        );
        assert_ok!(writer.add(&key, EnvelopeType::Info, "test", None).await);
        assert_ok!(writer.stop(&key).await);
        assert_ok!(writer.add(&key, EnvelopeType::Info, "late", None).await);

        let envelopes: Vec<Envelope> = collect(&listener, &key, plain())
            .await
            .into_iter()
            .filter_map(ListenItem::into_envelope)
            .collect();

        let kinds: Vec<EnvelopeType> = envelopes.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EnvelopeType::Begin, EnvelopeType::Event, EnvelopeType::Info]
        );
        assert_eq!(envelopes[1].body, Some(json!({"data": "hello"})));
        assert_eq!(envelopes[2].body, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_serialized_output_roundtrips() {
        let (_, writer, listener) = setup();
        let key = SessionKey::new(42, 1, "9");
        let body = json!({"idx": 0, "content": "ünïcode", "list": [1, {"a": null}]});
        assert_ok!(writer.start(&key).await);
        assert_ok!(
            writer
                .add(&key, EnvelopeType::Event, "test", Some(body.clone()))
                .await
        );
        assert_ok!(writer.stop(&key).await);

        let items = collect(&listener, &key, plain().serialize(true)).await;
        assert_eq!(items.len(), 2);

        let begin = SerializedEnvelope::from_json(items[0].as_serialized().unwrap()).unwrap();
        assert_eq!(begin.kind, EnvelopeType::Begin);

        let event = SerializedEnvelope::from_json(items[1].as_serialized().unwrap()).unwrap();
        assert_eq!(event.decode().unwrap().body, Some(body));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_activity_ends_after_wait() {
        let (_, _, listener) = setup();
        let key = SessionKey::new(42, 1, "silent");

        let started = Instant::now();
        let items = collect(&listener, &key, ListenOptions::default().wait(3)).await;
        assert!(items.is_empty());

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_after_first_entry() {
        let (_, writer, listener) = setup();
        let key = SessionKey::new(42, 1, "stalled");
        assert_ok!(writer.start(&key).await);

        let started = Instant::now();
        let items = collect(&listener, &key, plain().wait(1).timeout(5)).await;
        assert_eq!(items.len(), 1);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follows_live_producer() {
        let (_, writer, listener) = setup();
        let key = SessionKey::new(42, 1, "live");

        let producer = {
            let writer = writer.clone();
            let key = key.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                writer.start(&key).await?;
                for idx in 0..3 {
                    tokio::time::sleep(Duration::from_millis(700)).await;
                    writer
                        .add(&key, EnvelopeType::Event, "test", Some(json!({ "idx": idx })))
                        .await?;
                }
                writer.stop(&key).await
            })
        };

        let options = ListenOptions::default().wait(3).timeout(2).serialize(false);
        let items = collect(&listener, &key, options).await;
        assert_ok!(producer.await.unwrap());

        assert_eq!(items.len(), 4);
        let last = items[3].clone().into_envelope().unwrap();
        assert_eq!(last.body, Some(json!({"idx": 2})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_listeners() {
        let (_, writer, listener) = setup();
        let key = SessionKey::new(42, 1, "shared");
        assert_ok!(writer.start(&key).await);
        assert_ok!(writer.stop(&key).await);

        let (a, b) = tokio::join!(
            collect(&listener, &key, plain()),
            collect(&listener, &key, plain())
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_entry_is_an_error() {
        let (store, _, listener) = setup();
        let key = SessionKey::new(42, 1, "bad");
        let fields = [("type".to_string(), "mystery".to_string())]
            .into_iter()
            .collect();
        assert_ok!(store.append(&key.log_key("agx"), fields).await);

        let mut stream = listener.listen(&key, plain());
        assert!(matches!(
            stream.next().await,
            Some(Err(StreamError::Envelope(_)))
        ));
        assert!(stream.next().await.is_none());
    }
}
