//! Reassembly of streamed agent generation events.
//!
//! Provides:
//! - `Reassembler` - Publishes text and thinking fragments as they arrive
//!   and complete tool calls when their node ends
//! - `Node` / `Runtime` - Per-exchange buffering state
//! - `StreamDeps` - Session identity carried by the application's dependencies

pub mod node;
pub mod reassembler;

pub use node::{Node, PendingToolCall, Runtime};
pub use reassembler::{Reassembler, ReassemblyError, StreamDeps};
