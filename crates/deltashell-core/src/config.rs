//! Session tuning and `.deltarc.json` loading.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Default end-of-command marker.
pub const DEFAULT_SENTINEL: &str = "__DONE__";

/// Config file name looked up by `DeltaConfig::discover`.
pub const CONFIG_FILE_NAME: &str = ".deltarc.json";

/// Default accumulation buffer limit (16 MB).
const DEFAULT_MAX_BUFFER_BYTES: usize = 16 * 1024 * 1024;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found (looked in {0:?})")]
    NotFound(Vec<PathBuf>),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tuning for a single session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Marker echoed after every command.
    pub sentinel: String,
    /// Deadline per command, counted from the moment it is written.
    pub command_timeout: Option<Duration>,
    /// Upper bound on output buffered for one command.
    pub max_buffer_bytes: usize,
    /// How long to wait for the interpreter to exit after closing its input.
    pub shutdown_grace: Duration,
    /// Read buffer size for the interpreter's output pipes.
    pub read_chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sentinel: DEFAULT_SENTINEL.to_string(),
            command_timeout: None,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            shutdown_grace: Duration::from_millis(500),
            read_chunk_size: 8 * 1024,
        }
    }
}

impl SessionConfig {
    /// Override the sentinel.
    #[must_use]
    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinel = sentinel.into();
        self
    }

    /// Override the per-command timeout.
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Override the buffer limit.
    #[must_use]
    pub const fn with_max_buffer_bytes(mut self, max: usize) -> Self {
        self.max_buffer_bytes = max;
        self
    }

    /// Override the shutdown grace period.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Check invariants the framer relies on.
    ///
    /// # Errors
    /// Returns error if the sentinel is empty, multi-line or contains
    /// characters the shell would expand or split, or a size is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sentinel.trim().is_empty() {
            return Err(ConfigError::Invalid("sentinel must not be empty".into()));
        }
        if self.sentinel.contains(['\n', '\r']) {
            return Err(ConfigError::Invalid(
                "sentinel must fit on a single line".into(),
            ));
        }
        // The shell echoes the sentinel unquoted; it must come back verbatim.
        if self.sentinel.starts_with('-') || !self.sentinel.chars().all(is_sentinel_char) {
            return Err(ConfigError::Invalid(format!(
                "sentinel {:?} may only contain ASCII letters, digits and `_.:-`, and must not start with `-`",
                self.sentinel
            )));
        }
        if self.max_buffer_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_buffer_bytes must be greater than zero".into(),
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "read_chunk_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Characters the shell passes through `echo` unchanged.
const fn is_sentinel_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')
}

/// One named execution target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PhaseConfig {
    /// ANSI colour code used by front ends.
    pub color: String,
    /// Host to reach; `localhost` means a local shell.
    pub ssh: String,
}

/// Optional `"session"` block of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionOverrides {
    timeout_secs: Option<u64>,
    sentinel: Option<String>,
    max_buffer_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LogicBlock {
    #[serde(default)]
    gates: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    phases: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    logic: LogicBlock,
    #[serde(default)]
    session: SessionOverrides,
}

/// Parsed `.deltarc.json`.
#[derive(Debug, Clone, Default)]
pub struct DeltaConfig {
    /// Phases by name.
    pub phases: BTreeMap<String, PhaseConfig>,
    /// Gate names per phase. Parsed but not enforced by the session core.
    pub gates: BTreeMap<String, String>,
    /// Session tuning shared by every phase.
    pub session: SessionConfig,
}

impl DeltaConfig {
    /// Parse config JSON.
    ///
    /// Phases missing `color` or `ssh` are skipped with a warning.
    ///
    /// # Errors
    /// Returns error if the JSON is malformed, `phases` is missing, or the
    /// resulting session settings are invalid.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json)?;
        let raw_phases = raw
            .phases
            .ok_or_else(|| ConfigError::Invalid("missing 'phases'".into()))?;

        let mut phases = BTreeMap::new();
        for (name, value) in raw_phases {
            match serde_json::from_value::<PhaseConfig>(value) {
                Ok(phase) => {
                    phases.insert(name, phase);
                }
                Err(err) => {
                    tracing::warn!(phase = %name, %err, "Skipping invalid phase");
                }
            }
        }

        let mut session = SessionConfig::default();
        if let Some(secs) = raw.session.timeout_secs {
            session.command_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(sentinel) = raw.session.sentinel {
            session.sentinel = sentinel;
        }
        if let Some(max) = raw.session.max_buffer_bytes {
            session.max_buffer_bytes = max;
        }
        session.validate()?;

        Ok(Self {
            phases,
            gates: raw.logic.gates,
            session,
        })
    }

    /// Load config from a file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&contents)?;
        tracing::debug!(path = %path.display(), phases = config.phases.len(), "Loaded config");
        Ok(config)
    }

    /// Load config from the first existing candidate location.
    ///
    /// # Errors
    /// Returns `ConfigError::NotFound` if no candidate exists, or any load error.
    pub fn discover() -> Result<Self, ConfigError> {
        let candidates = candidate_paths();
        match candidates.iter().find(|p| p.is_file()) {
            Some(path) => Self::load(path),
            None => Err(ConfigError::NotFound(candidates)),
        }
    }

    /// Look up a phase by name.
    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&PhaseConfig> {
        self.phases.get(name)
    }
}

/// `./.deltarc.json`, then `$HOME/.deltarc.json`.
fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(2);
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(CONFIG_FILE_NAME));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(CONFIG_FILE_NAME));
    }
    paths
}
