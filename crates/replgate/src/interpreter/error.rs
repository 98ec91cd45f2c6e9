use std::time::Duration;

use thiserror::Error;

use super::demarcation::StreamKind;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to start interpreter: {0}")]
    Spawn(String),

    #[error("failed to write to interpreter stdin: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to read interpreter {stream}: {reason}")]
    Read { stream: StreamKind, reason: String },

    #[error("execution timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("interpreter bridge is closed")]
    Closed,
}

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
