//! Session registry: id allocation, lookup, eviction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::SessionError;
use super::handle::Session;
use super::models::{ExecutionResult, SessionInfo};
use crate::config::InterpreterConfig;

/// Maps opaque session ids to live sessions.
///
/// Cloning is cheap and shares the underlying map. Dead sessions are removed as soon as
/// they die, so an id that stopped working looks exactly like one that never existed.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    config: Arc<InterpreterConfig>,
    closing: Arc<AtomicBool>,
}

impl SessionRegistry {
    pub fn new(config: InterpreterConfig) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            config: Arc::new(config),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Start a new interpreter and register it under a fresh id.
    ///
    /// The session is only stored once its handshake succeeded.
    pub async fn create(&self) -> Result<Arc<Session>, SessionError> {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(id.clone()));
        session.start(&self.config).await?;

        self.sessions.insert(id.clone(), Arc::clone(&session));
        if self.closing.load(Ordering::SeqCst) {
            // Shutdown took its snapshot while this session was still starting.
            self.evict(&id);
            session.close().await;
            return Err(SessionError::ShuttingDown);
        }

        let pid = session.info().await.pid;
        info!(session_id = %id, pid = ?pid, "Session created");
        Ok(session)
    }

    /// Find a live session. Never creates anything.
    pub async fn lookup(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        let session = self
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        if session.state().await.is_live() {
            Ok(session)
        } else {
            Err(SessionError::NotFound(id.to_string()))
        }
    }

    /// Drop the mapping for `id`. Evicting an unknown id is a no-op.
    pub fn evict(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Evict a session and kill its interpreter.
    pub async fn close(&self, id: &str) -> Result<(), SessionError> {
        let session = self
            .evict(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.close().await;
        info!(session_id = %id, "Session closed");
        Ok(())
    }

    /// Run `code` in the session named by `id`, or in a new session when `id` is `None`.
    ///
    /// Unknown ids fail before any process is touched. A failed execution evicts the
    /// session; an `ephemeral` call closes it after returning its output.
    pub async fn execute(
        &self,
        id: Option<&str>,
        code: &str,
        ephemeral: bool,
    ) -> Result<ExecutionResult, SessionError> {
        let session = match id {
            Some(id) => self.lookup(id).await?,
            None => self.create().await?,
        };
        let session_id = session.id().to_string();

        let output = match session.execute(code).await {
            Ok(output) => output,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Evicting session");
                self.evict(&session_id);
                return Err(e);
            }
        };

        if ephemeral {
            self.evict(&session_id);
            session.close().await;
        }

        Ok(ExecutionResult {
            id: session_id,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            let info = session.info().await;
            if info.state.is_live() {
                infos.push(info);
            }
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Close every session. Sessions that finish starting afterwards close themselves.
    pub async fn shutdown(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        info!("Shutting down {} session(s)", ids.len());
        for id in ids {
            if let Some(session) = self.evict(&id) {
                session.close().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(InterpreterConfig::posix_shell())
    }

    #[tokio::test]
    async fn test_create_registers_ready_session() {
        let registry = registry();
        let session = registry.create().await.unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(session.state().await, SessionState::Ready);
        let found = registry.lookup(session.id()).await.unwrap();
        assert!(Arc::ptr_eq(&found, &session));

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_create_is_not_stored() {
        let registry = SessionRegistry::new(InterpreterConfig {
            program: "replgate-no-such-interpreter".to_string(),
            ..InterpreterConfig::posix_shell()
        });

        let err = registry.create().await.unwrap_err();
        assert!(matches!(err, SessionError::Bridge(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_create_after_shutdown_is_rejected() {
        let registry = registry();
        registry.shutdown().await;

        let err = registry.create().await.unwrap_err();
        assert!(matches!(err, SessionError::ShuttingDown));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_create_finishing_during_shutdown_closes_itself() {
        let registry = registry();
        let starting = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.create().await })
        };
        registry.shutdown().await;

        // Either shutdown saw the session, or the session saw shutdown.
        match starting.await.unwrap() {
            Ok(session) => assert_eq!(session.state().await, SessionState::Dead),
            Err(err) => assert!(matches!(err, SessionError::ShuttingDown)),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_session_debug_shows_id() {
        let session = Session::new("debug-me".to_string());
        assert!(format!("{session:?}").contains("debug-me"));
    }

    #[tokio::test]
    async fn test_lookup_unknown_id() {
        let registry = registry();
        let err = registry.lookup("nope").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_evict_is_idempotent() {
        let registry = registry();
        let session = registry.create().await.unwrap();
        let id = session.id().to_string();

        assert!(registry.evict(&id).is_some());
        assert!(registry.evict(&id).is_none());
        assert!(registry.evict("never-existed").is_none());

        session.close().await;
    }

    #[tokio::test]
    async fn test_execute_without_id_creates_session() {
        let registry = registry();
        let result = registry.execute(None, "echo hello", false).await.unwrap();

        assert_eq!(result.stdout, "hello");
        assert_eq!(result.stderr, "");
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(&result.id).await.is_ok());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_state_persists_across_calls() {
        let registry = registry();
        let first = registry.execute(None, "x=5", false).await.unwrap();
        let second = registry
            .execute(Some(&first.id), "echo $x", false)
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.stdout, "5");

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_id_spawns_nothing() {
        let registry = registry();
        let err = registry
            .execute(Some("missing"), "echo hi", false)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::NotFound(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_evicts_and_id_becomes_unknown() {
        let registry = SessionRegistry::new(InterpreterConfig {
            execution_timeout_ms: 200,
            ..InterpreterConfig::posix_shell()
        });
        let created = registry.execute(None, "true", false).await.unwrap();

        let err = registry
            .execute(Some(&created.id), "sleep 5", false)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(registry.is_empty());

        let err = registry
            .execute(Some(&created.id), "echo again", false)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_interpreter_exit_evicts_session() {
        let registry = registry();
        let created = registry.execute(None, "true", false).await.unwrap();

        let err = registry
            .execute(Some(&created.id), "exit 3", false)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Bridge(_)));
        assert!(!err.is_timeout());
        assert!(registry.lookup(&created.id).await.is_err());
    }

    #[tokio::test]
    async fn test_ephemeral_session_is_closed_after_call() {
        let registry = registry();
        let result = registry.execute(None, "echo once", true).await.unwrap();

        assert_eq!(result.stdout, "once");
        assert!(registry.is_empty());
        assert!(matches!(
            registry.execute(Some(&result.id), "echo twice", false).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_distinct_sessions_do_not_cross_contaminate() {
        let registry = registry();
        let a = registry.execute(None, "who=a", false).await.unwrap();
        let b = registry.execute(None, "who=b", false).await.unwrap();
        assert_ne!(a.id, b.id);

        let (ra, rb) = tokio::join!(
            registry.execute(Some(&a.id), "sleep 0.2; echo $who; echo $who", false),
            registry.execute(Some(&b.id), "echo $who; echo $who", false),
        );

        assert_eq!(ra.unwrap().stdout, "a\na");
        assert_eq!(rb.unwrap().stdout, "b\nb");

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_list_and_close() {
        let registry = registry();
        let a = registry.create().await.unwrap();
        let b = registry.create().await.unwrap();

        let listed = registry.list().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, a.id());
        assert!(listed.iter().all(|s| s.state == SessionState::Ready));

        registry.close(b.id()).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(b.state().await, SessionState::Dead);
        assert!(matches!(
            registry.close(b.id()).await,
            Err(SessionError::NotFound(_))
        ));

        registry.shutdown().await;
        assert!(registry.is_empty());
        assert_eq!(a.state().await, SessionState::Dead);
    }
}
