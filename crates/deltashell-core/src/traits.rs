//! Core traits for interpreter I/O and command rewriting.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Nothing has been written since the last frame was resolved.
    Idle,
    /// One command has been written and its sentinel is still outstanding.
    Busy,
    /// Session is shut down; no further commands are accepted.
    Closed,
}

impl SessionStatus {
    /// Whether the session has reached its terminal state.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Interpreter process error.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Spawn failed: {0}")]
    Spawn(String),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("Interpreter input is closed")]
    InputClosed,
    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),
}

/// Byte-oriented duplex channel to a long-running interpreter.
///
/// Output is a single stream (stdout and stderr merged) delivered in
/// arbitrary chunks. Chunk boundaries carry no meaning.
#[async_trait]
pub trait Interpreter: Send + 'static {
    /// Append bytes to the interpreter's input.
    ///
    /// # Errors
    /// Returns error if the input stream is closed or the write fails.
    async fn write(&mut self, bytes: &[u8]) -> Result<(), ProcessError>;

    /// Wait for the next output chunk. `None` means end of stream.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses no
    /// output.
    async fn read_chunk(&mut self) -> Option<Bytes>;

    /// End the interpreter and release its streams. Idempotent.
    async fn terminate(&mut self);
}

/// Pure text rewrite applied to a command before it is submitted.
pub trait Transformer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Rewrite the command text.
    fn rewrite(&self, input: &str) -> String;
}
