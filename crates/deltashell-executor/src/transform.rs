//! Command transformers.
//!
//! Each phase rewrites a command through an ordered chain before it is
//! submitted to the phase's session.

use deltashell_core::Transformer;

/// Default environment prefix.
pub const DEFAULT_ENV_PREFIX: &str = "export PATH=/custom/bin:$PATH; ";

/// Command substituted for a blocked one.
pub const BLOCKED_REPLACEMENT: &str = "echo 'Command blocked for safety!'";

/// Prepends an environment setup prefix.
#[derive(Debug, Clone)]
pub struct EnvSetup {
    name: String,
    prefix: String,
}

impl EnvSetup {
    #[must_use]
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
        }
    }
}

impl Transformer for EnvSetup {
    fn name(&self) -> &str {
        &self.name
    }

    fn rewrite(&self, input: &str) -> String {
        format!("{}{input}", self.prefix)
    }
}

/// Replaces commands containing a blocked pattern.
#[derive(Debug, Clone)]
pub struct Filter {
    name: String,
    blocked: Vec<String>,
    replacement: String,
}

impl Filter {
    /// Filter blocking `rm -rf`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocked: vec!["rm -rf".to_string()],
            replacement: BLOCKED_REPLACEMENT.to_string(),
        }
    }

    /// Also block commands containing `pattern`.
    #[must_use]
    pub fn block(mut self, pattern: impl Into<String>) -> Self {
        self.blocked.push(pattern.into());
        self
    }

    fn matched(&self, input: &str) -> Option<&str> {
        self.blocked
            .iter()
            .map(String::as_str)
            .find(|pattern| input.contains(pattern))
    }
}

impl Transformer for Filter {
    fn name(&self) -> &str {
        &self.name
    }

    fn rewrite(&self, input: &str) -> String {
        match self.matched(input) {
            Some(pattern) => {
                tracing::warn!(transformer = %self.name, pattern, "Dangerous command blocked");
                self.replacement.clone()
            }
            None => input.to_string(),
        }
    }
}

/// Logs the command and passes it through.
#[derive(Debug, Clone)]
pub struct Logging {
    name: String,
}

impl Logging {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Transformer for Logging {
    fn name(&self) -> &str {
        &self.name
    }

    fn rewrite(&self, input: &str) -> String {
        tracing::info!(transformer = %self.name, command = input, "Command");
        input.to_string()
    }
}

/// Ordered list of transformers.
#[derive(Default)]
pub struct TransformChain {
    transformers: Vec<Box<dyn Transformer>>,
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.transformers.iter().map(|t| t.name()))
            .finish()
    }
}

impl TransformChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain used for every phase: `EnvSetup` -> `Filter` -> `Logging`.
    #[must_use]
    pub fn standard(phase: &str) -> Self {
        Self::new()
            .with(EnvSetup::new(format!("EnvSetup_{phase}"), DEFAULT_ENV_PREFIX))
            .with(Filter::new(format!("Filter_{phase}")))
            .with(Logging::new(format!("Logger_{phase}")))
    }

    /// Append a transformer.
    #[must_use]
    pub fn with(mut self, transformer: impl Transformer + 'static) -> Self {
        self.transformers.push(Box::new(transformer));
        self
    }

    /// Transformer names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.transformers.iter().map(|t| t.name())
    }

    /// Run `input` through every transformer in order.
    #[must_use]
    pub fn apply(&self, input: &str) -> String {
        self.transformers
            .iter()
            .fold(input.to_string(), |text, t| t.rewrite(&text))
    }
}
