//! Interpreter process management.
//!
//! Provides:
//! - `ChildInterpreter` - Long-running child process with merged output
//! - Shell detection and executable resolution utilities

pub mod child;
pub mod shell;

pub use child::{ChildInterpreter, SpawnOptions};
pub use shell::{UnixShell, get_interactive_shell, resolve_executable_path};
