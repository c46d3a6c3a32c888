//! Per-command outcomes and session errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ConfigError, ProcessError};

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to start interpreter: {0}")]
    ProcessSpawn(#[from] ProcessError),
    #[error("Failed to write command: {0}")]
    Write(String),
    #[error("Interpreter output closed before the command finished")]
    StreamClosed,
    #[error("No end-of-command marker within the timeout")]
    FramingTimeout,
    #[error("Command output exceeded the buffer limit")]
    OutputOverflow,
    #[error("Session is closed")]
    Closed,
    #[error("Invalid session config: {0}")]
    Config(#[from] ConfigError),
}

/// Result delivered exactly once for every submitted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// Output preceding the sentinel, trimmed.
    Completed(String),
    /// No sentinel arrived before the command's deadline.
    TimedOut,
    /// The interpreter's output ended before the sentinel arrived.
    ProcessExited,
    /// The command could not be written to the interpreter.
    WriteFailed(String),
    /// Output grew past the buffer limit without a sentinel.
    OutputOverflow,
    /// The session was closed before the command finished.
    Cancelled,
}

impl CommandOutcome {
    /// Whether the command completed normally.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Completed output, if any.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Completed(text) => Some(text),
            _ => None,
        }
    }

    /// Convert into a `Result`, mapping failures onto `SessionError`.
    ///
    /// # Errors
    /// Returns the `SessionError` matching any non-completed outcome.
    pub fn into_result(self) -> Result<String, SessionError> {
        match self {
            Self::Completed(text) => Ok(text),
            Self::TimedOut => Err(SessionError::FramingTimeout),
            Self::ProcessExited => Err(SessionError::StreamClosed),
            Self::WriteFailed(reason) => Err(SessionError::Write(reason)),
            Self::OutputOverflow => Err(SessionError::OutputOverflow),
            Self::Cancelled => Err(SessionError::Closed),
        }
    }
}
