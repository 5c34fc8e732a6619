//! Core abstractions for relaying agent output through a per-session log.
//!
//! This crate provides the fundamental building blocks:
//! - `StreamConfig` - Namespace, origins and timing shared by every component
//! - `SessionKey` - Session identity and its log/liveness key layout
//! - `Envelope` - Typed record appended to a session log
//! - `ModelMessage` / `AgentStreamEvent` - Agent framework messages and events
//! - `LogStore` trait and the in-process `MemoryLogStore`

pub mod config;
pub mod envelope;
pub mod key;
pub mod memory;
pub mod messages;
pub mod traits;

pub use config::StreamConfig;
pub use envelope::{Envelope, EnvelopeError, EnvelopeType};
pub use key::SessionKey;
pub use memory::MemoryLogStore;
pub use messages::{AgentStreamEvent, ModelMessage, ModelRequest, ModelResponse};
pub use traits::{EntryId, Fields, LogEntry, LogStore, StoreError};
