//! A single persistent interpreter session.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::error::SessionError;
use super::models::{SessionInfo, SessionState};
use crate::config::InterpreterConfig;
use crate::interpreter::{BridgeError, ExecutionOutput, InterpreterBridge};

/// An interpreter bridge plus the lock that serializes executions against it.
///
/// The bridge slot is `None` before [`start`](Self::start) succeeds and after teardown.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    last_used_at: RwLock<Option<DateTime<Utc>>>,
    executions: AtomicU64,
    pid: OnceLock<u32>,
    bridge: Mutex<Option<InterpreterBridge>>,
}

impl Session {
    pub(crate) fn new(id: String) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            state: RwLock::new(SessionState::Initializing),
            last_used_at: RwLock::new(None),
            executions: AtomicU64::new(0),
            pid: OnceLock::new(),
            bridge: Mutex::new(None),
        }
    }

    /// Spawn the interpreter and complete the handshake.
    pub(crate) async fn start(&self, config: &InterpreterConfig) -> Result<(), BridgeError> {
        let mut slot = self.bridge.lock().await;
        match InterpreterBridge::open(config).await {
            Ok(bridge) => {
                if let Some(pid) = bridge.pid() {
                    let _ = self.pid.set(pid);
                }
                *slot = Some(bridge);
                self.set_state(SessionState::Ready).await;
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Dead).await;
                Err(e)
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn set_state(&self, state: SessionState) {
        *self.state.write().await = state;
    }

    /// Run `code` in this session's interpreter.
    ///
    /// Waits for any in-flight execution first. A timeout or stream failure kills the
    /// interpreter and leaves the session `Dead`.
    pub async fn execute(&self, code: &str) -> Result<ExecutionOutput, SessionError> {
        let mut slot = self.bridge.lock().await;
        let Some(bridge) = slot.as_mut() else {
            return Err(SessionError::NotFound(self.id.clone()));
        };

        self.set_state(SessionState::Busy).await;
        self.executions.fetch_add(1, Ordering::Relaxed);
        *self.last_used_at.write().await = Some(Utc::now());

        match bridge.execute(code).await {
            Ok(output) => {
                self.set_state(SessionState::Ready).await;
                Ok(output)
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Execution failed, tearing down session");
                self.set_state(SessionState::Dead).await;
                bridge.close().await;
                slot.take();
                Err(e.into())
            }
        }
    }

    /// Mark the session dead and kill its interpreter, waiting for any in-flight execution.
    pub async fn close(&self) {
        let mut slot = self.bridge.lock().await;
        self.set_state(SessionState::Dead).await;
        if let Some(mut bridge) = slot.take() {
            debug!(session_id = %self.id, "Closing session");
            bridge.close().await;
        }
    }

    pub async fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            state: self.state().await,
            pid: self.pid.get().copied(),
            created_at: self.created_at,
            last_used_at: *self.last_used_at.read().await,
            executions: self.executions.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("pid", &self.pid.get())
            .field("executions", &self.executions.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn started(config: &InterpreterConfig) -> Session {
        let session = Session::new("test-session".to_string());
        session.start(config).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_new_session_is_initializing_until_started() {
        let session = Session::new("s".to_string());
        assert_eq!(session.state().await, SessionState::Initializing);

        session.start(&InterpreterConfig::posix_shell()).await.unwrap();
        assert_eq!(session.state().await, SessionState::Ready);
        assert!(session.info().await.pid.is_some());

        session.close().await;
    }

    #[tokio::test]
    async fn test_failed_start_leaves_session_dead() {
        let config = InterpreterConfig {
            program: "replgate-no-such-interpreter".to_string(),
            ..InterpreterConfig::posix_shell()
        };
        let session = Session::new("s".to_string());
        assert!(session.start(&config).await.is_err());
        assert_eq!(session.state().await, SessionState::Dead);
    }

    #[tokio::test]
    async fn test_success_returns_to_ready_and_counts() {
        let session = started(&InterpreterConfig::posix_shell()).await;

        let output = session.execute("echo hi").await.unwrap();
        assert_eq!(output.stdout, "hi");
        assert_eq!(session.state().await, SessionState::Ready);

        let info = session.info().await;
        assert_eq!(info.executions, 1);
        assert!(info.last_used_at.is_some());

        session.close().await;
    }

    #[tokio::test]
    async fn test_timeout_kills_session() {
        let config = InterpreterConfig {
            execution_timeout_ms: 200,
            ..InterpreterConfig::posix_shell()
        };
        let session = started(&config).await;

        let err = session.execute("sleep 5").await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(session.state().await, SessionState::Dead);

        let err = session.execute("echo again").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_executions_are_serialized() {
        let session = Arc::new(started(&InterpreterConfig::posix_shell()).await);

        let mut handles = Vec::new();
        for i in 0..8 {
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move {
                let output = session
                    .execute(&format!("n=$((${{n:-0}} + 1)); echo {i}"))
                    .await
                    .unwrap();
                assert_eq!(output.stdout, i.to_string());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let output = session.execute("echo $n").await.unwrap();
        assert_eq!(output.stdout, "8");
        assert_eq!(session.info().await.executions, 9);

        session.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let session = started(&InterpreterConfig::posix_shell()).await;
        session.close().await;
        session.close().await;
        assert_eq!(session.state().await, SessionState::Dead);
    }
}
