//! Interpreter processes driven over their standard streams.

mod bridge;
mod demarcation;
mod error;

use serde::Serialize;

pub use bridge::InterpreterBridge;
pub use demarcation::{CODE_PLACEHOLDER, SENTINEL_PLACEHOLDER, Sentinel, StreamKind};
pub use error::BridgeError;

/// Text captured from one execution, newline-joined without a trailing newline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
}
