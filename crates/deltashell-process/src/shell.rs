//! Shell detection and executable resolution.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Returns the interactive shell to use for local sessions.
///
/// This is the user's `$SHELL`, falling back to `/bin/sh`. Sessions write
/// POSIX shell syntax (`exec 2>&1`, `; echo`), so Windows shells such as
/// `cmd.exe` are not supported as local interpreters.
#[must_use]
pub fn get_interactive_shell() -> UnixShell {
    UnixShell::current_shell()
}

/// Resolve an executable by name.
///
/// The search order is:
/// 1. Explicit paths (absolute, or relative with a separator).
/// 2. The current process PATH via `which`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    which_async(executable).await
}

async fn which_async(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

/// Unix shell types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnixShell {
    Zsh(PathBuf),
    Bash(PathBuf),
    Sh(PathBuf),
    Other(PathBuf),
}

impl UnixShell {
    /// Get the shell path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Zsh(p) | Self::Bash(p) | Self::Sh(p) | Self::Other(p) => p,
        }
    }

    /// Whether this shell supports login mode.
    #[must_use]
    pub const fn login(&self) -> bool {
        matches!(self, Self::Zsh(_) | Self::Bash(_))
    }

    /// Arguments that make the shell read commands from stdin.
    ///
    /// Login shells get `-l` so the user's PATH is in effect.
    #[must_use]
    pub fn stdin_args(&self) -> Vec<String> {
        match self {
            Self::Other(_) => Vec::new(),
            shell if shell.login() => vec!["-l".into(), "-s".into()],
            _ => vec!["-s".into()],
        }
    }

    /// Get the current shell from `$SHELL`.
    #[must_use]
    pub fn current_shell() -> Self {
        if let Ok(shell) = std::env::var("SHELL") {
            if let Some(shell) = Self::from_path(Path::new(&shell)) {
                return shell;
            }
        }
        Self::Sh(PathBuf::from("/bin/sh"))
    }

    /// Create from a path.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        if !(path.is_absolute() && path.is_file()) {
            return None;
        }
        let path_buf = path.to_path_buf();
        let shell = match path.file_name().and_then(OsStr::to_str) {
            Some("zsh") => Self::Zsh(path_buf),
            Some("bash") => Self::Bash(path_buf),
            Some("sh") => Self::Sh(path_buf),
            _ => Self::Other(path_buf),
        };
        Some(shell)
    }
}
