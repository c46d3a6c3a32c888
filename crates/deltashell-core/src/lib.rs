//! Core abstractions for persistent interpreter sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Interpreter` - Byte-level duplex channel to a long-running interpreter
//! - `Transformer` - Text rewrite step applied to commands before submission
//! - `CommandOutcome` / `SessionError` - Per-command results and failures
//! - `SessionConfig` / `DeltaConfig` - Session tuning and `.deltarc.json` loading

pub mod config;
pub mod launch;
pub mod outcome;
pub mod traits;

pub use config::{ConfigError, DeltaConfig, PhaseConfig, SessionConfig};
pub use launch::InterpreterCommand;
pub use outcome::{CommandOutcome, SessionError};
pub use traits::{Interpreter, ProcessError, SessionId, SessionStatus, Transformer};
