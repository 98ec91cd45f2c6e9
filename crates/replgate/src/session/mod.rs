//! Persistent interpreter sessions.
//!
//! - `Session` serializes executions against one interpreter bridge
//! - `SessionRegistry` creates sessions lazily and forgets them once they die

mod error;
mod handle;
mod models;
mod registry;

pub use error::SessionError;
pub use handle::Session;
pub use models::{ExecutionResult, SessionInfo, SessionState};
pub use registry::SessionRegistry;
