//! Launch description for an interpreter process.

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};

/// How to start an interactive interpreter.
///
/// The session owns the child's stdin, stdout and stderr entirely, so the
/// program must read commands from stdin (e.g. `sh`, `ssh -T host`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterCommand {
    /// Program name or path.
    pub program: String,

    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the child.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Lines written to the interpreter right after it starts, before any
    /// command. Shell targets use `exec 2>&1` so stderr shares stdout's
    /// ordering.
    #[serde(default)]
    pub preamble: Vec<String>,
}

impl InterpreterCommand {
    /// Create a launch description with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            preamble: Vec::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Append a preamble line.
    #[must_use]
    pub fn preamble_line(mut self, line: impl Into<String>) -> Self {
        self.preamble.push(line.into());
        self
    }

    /// Human-readable command line for logs.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
