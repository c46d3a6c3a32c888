//! Session manager for named targets.

use std::collections::HashMap;

use deltashell_core::{InterpreterCommand, SessionConfig, SessionError};
use tokio::sync::RwLock;

use crate::session::{PendingResult, Session};

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Target not found: {0}")]
    NotFound(String),
    #[error("Target already open: {0}")]
    AlreadyOpen(String),
}

/// Owns one persistent session per target name.
///
/// Sessions share nothing; each has its own interpreter, buffer and queue.
pub struct SessionManager {
    config: SessionConfig,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    /// Create a manager that starts sessions with `config`.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a session for `name`.
    ///
    /// A previous session under the same name that has already closed is
    /// replaced.
    ///
    /// # Errors
    /// Returns error if a live session is registered under `name` or the
    /// interpreter cannot be started.
    pub async fn open(
        &self,
        name: &str,
        command: &InterpreterCommand,
    ) -> Result<Session, ManagerError> {
        if self.is_open(name).await {
            return Err(ManagerError::AlreadyOpen(name.to_string()));
        }

        let session = Session::start(command, self.config.clone()).await?;
        tracing::info!(target_name = name, session = %session.id(), "Opened session");

        if let Err(err) = self.insert(name, session.clone()).await {
            // Lost a race with a concurrent open.
            session.close().await;
            return Err(err);
        }
        Ok(session)
    }

    /// Register an existing session under `name`.
    ///
    /// # Errors
    /// Returns error if a live session is already registered under `name`.
    pub async fn insert(&self, name: &str, session: Session) -> Result<(), ManagerError> {
        let mut sessions = self.sessions.write().await;
        if sessions.get(name).is_some_and(|s| !s.status().is_closed()) {
            return Err(ManagerError::AlreadyOpen(name.to_string()));
        }
        sessions.insert(name.to_string(), session);
        Ok(())
    }

    /// Get the session for `name`.
    pub async fn get(&self, name: &str) -> Option<Session> {
        self.sessions.read().await.get(name).cloned()
    }

    /// Whether a live session is registered under `name`.
    pub async fn is_open(&self, name: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(name)
            .is_some_and(|s| !s.status().is_closed())
    }

    /// Names of all registered sessions, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Submit a command to the session for `name`.
    ///
    /// # Errors
    /// Returns error if no session is registered or it is closed.
    pub async fn submit(&self, name: &str, text: &str) -> Result<PendingResult, ManagerError> {
        let session = self
            .get(name)
            .await
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))?;
        Ok(session.submit(text)?)
    }

    /// Close and forget the session for `name`.
    ///
    /// # Errors
    /// Returns error if no session is registered.
    pub async fn close(&self, name: &str) -> Result<(), ManagerError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(name)
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))?;
        session.close().await;
        Ok(())
    }

    /// Close every session concurrently.
    pub async fn close_all(&self) {
        let sessions: Vec<Session> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        futures::future::join_all(sessions.iter().map(|session| session.close())).await;
    }
}
