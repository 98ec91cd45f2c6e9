//! Session data types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Liveness of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Interpreter is starting and the handshake has not completed.
    Initializing,
    /// Idle, waiting for code.
    Ready,
    /// An execution is in flight.
    Busy,
    /// Torn down; never executes again.
    Dead,
}

impl SessionState {
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Dead)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Busy => write!(f, "busy"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// Outcome of one successful `execute` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub id: String,
    pub stdout: String,
    pub stderr: String,
}

/// Snapshot of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub state: SessionState,
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub executions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display_matches_serde() {
        for state in [
            SessionState::Initializing,
            SessionState::Ready,
            SessionState::Busy,
            SessionState::Dead,
        ] {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, serde_json::Value::String(state.to_string()));
        }
    }

    #[test]
    fn test_only_dead_is_not_live() {
        assert!(SessionState::Initializing.is_live());
        assert!(SessionState::Ready.is_live());
        assert!(SessionState::Busy.is_live());
        assert!(!SessionState::Dead.is_live());
    }
}
