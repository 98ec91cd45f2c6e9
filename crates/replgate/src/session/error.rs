use thiserror::Error;

use crate::interpreter::BridgeError;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Unknown id; sessions that died are reported the same way.
    #[error("unknown session id: {0}")]
    NotFound(String),

    #[error("server is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl SessionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Bridge(e) if e.is_timeout())
    }
}
