//! Conversation history, session storage and run orchestration.
//!
//! Provides:
//! - `History` / `Session` - Ordered messages and their persistence contract
//! - `nodes_from_msgs` - Flatten stored history into display nodes
//! - `run` - Drive an agent through the stream for one prompt
//! - Storage implementations (memory, SQLite)

pub mod runner;
pub mod session;
pub mod storage;

pub use runner::{Agent, AgentError, AgentNode, AgentRun, RunError, run};
pub use session::{DEFAULT_TITLE, History, Session, SessionError, nodes_from_msgs};
pub use storage::{HistoryStorage, SessionRecord, StorageError, StoredSession};
#[cfg(feature = "memory")]
pub use storage::MemoryStorage;
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
