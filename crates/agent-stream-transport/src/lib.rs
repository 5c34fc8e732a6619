//! Session log writer, listener and registry.
//!
//! Provides:
//! - `StreamWriter` - Append envelopes and manage the liveness flag
//! - `SessionListener` - Bounded-wait subscription to a session log
//! - `SessionRegistry` - Discover live sessions
//! - Wire protocol for consumers that need flat JSON (base64 body)
//! - SSE adapter (feature: sse)

pub mod listener;
pub mod protocol;
pub mod registry;
pub mod writer;

#[cfg(feature = "sse")]
pub mod sse;

pub use listener::{ListenItem, ListenOptions, SessionListener};
pub use protocol::SerializedEnvelope;
pub use registry::SessionRegistry;
pub use writer::StreamWriter;

use agent_stream_core::{EnvelopeError, StoreError};

/// Transport error.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}
