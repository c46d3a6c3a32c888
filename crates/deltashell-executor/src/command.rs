//! Command building utilities.

use deltashell_core::InterpreterCommand;
use deltashell_process::{UnixShell, get_interactive_shell};
use thiserror::Error;

/// Preamble line that folds the interpreter's stderr into stdout.
///
/// Run inside the interpreter, so ordering against the sentinel echo is kept.
pub const MERGE_STDERR: &str = "exec 2>&1";

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
}

/// Builder for constructing interpreter commands from shell-style strings.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base executable command, e.g. `"bash -l -s"`.
    pub base: String,
    /// Lines written to the interpreter right after it starts.
    pub preamble: Vec<String>,
}

impl CommandBuilder {
    /// Create a new command builder.
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            preamble: Vec::new(),
        }
    }

    /// Add a preamble line.
    #[must_use]
    pub fn preamble_line<S: Into<String>>(mut self, line: S) -> Self {
        self.preamble.push(line.into());
        self
    }

    /// Build the interpreter command.
    ///
    /// # Errors
    /// Returns error if the base cannot be split or yields no program.
    pub fn build(&self) -> Result<InterpreterCommand, CommandBuildError> {
        let mut parts = split_command_line(&self.base)?;

        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }

        let program = parts.remove(0);
        let command = self
            .preamble
            .iter()
            .fold(InterpreterCommand::new(program).args(parts), |cmd, line| {
                cmd.preamble_line(line.clone())
            });
        Ok(command)
    }
}

fn split_command_line(input: &str) -> Result<Vec<String>, CommandBuildError> {
    #[cfg(windows)]
    {
        let parts = winsplit::split(input);
        if parts.is_empty() {
            Err(CommandBuildError::EmptyCommand)
        } else {
            Ok(parts)
        }
    }

    #[cfg(not(windows))]
    {
        shlex::split(input).ok_or_else(|| CommandBuildError::InvalidBase(input.to_string()))
    }
}

/// Where a phase's commands run.
///
/// Both variants expect a POSIX shell on the far end; Windows hosts are not
/// supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The user's shell on this machine.
    Local(UnixShell),
    /// A remote host reached over ssh.
    Remote(String),
}

impl Target {
    /// Map a configured host to a target.
    ///
    /// `localhost` and `127.0.0.1` run the local interactive shell.
    #[must_use]
    pub fn from_host(host: &str) -> Self {
        match host.trim() {
            "localhost" | "127.0.0.1" => Self::Local(get_interactive_shell()),
            other => Self::Remote(other.to_string()),
        }
    }

    /// Whether commands run on this machine.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Interpreter that serves this target.
    ///
    /// Remote hosts use `ssh -T`: without a remote pty the host does not echo
    /// input back, so the sentinel only appears once the command has run.
    #[must_use]
    pub fn interpreter_command(&self) -> InterpreterCommand {
        match self {
            Self::Local(shell) => InterpreterCommand::new(shell.path().to_string_lossy())
                .args(shell.stdin_args())
                .preamble_line(MERGE_STDERR),
            Self::Remote(host) => InterpreterCommand::new("ssh")
                .args(["-T", host.as_str()])
                .preamble_line(MERGE_STDERR),
        }
    }
}
