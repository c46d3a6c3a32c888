//! Launch targets and command rewriting for deltashell sessions.
//!
//! Provides:
//! - `Target`: how a phase's host maps to an interpreter process
//! - `CommandBuilder`: shell-style command lines to `InterpreterCommand`
//! - Transformer chain applied to every command before submission

pub mod command;
pub mod transform;

pub use command::{CommandBuildError, CommandBuilder, MERGE_STDERR, Target};
pub use transform::{BLOCKED_REPLACEMENT, DEFAULT_ENV_PREFIX, EnvSetup, Filter, Logging, TransformChain};
