//! Core configuration
//!
//! One [`CoreConfig`] value is built at process start and passed to the
//! store and dispatcher constructors. There is no process-wide settings
//! object.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable for the session directory
pub const ENV_CONTEXT_DIR: &str = "CTXHOST_CONTEXT_DIR";
/// Environment variable for the default context window size
pub const ENV_CONTEXT_WINDOW: &str = "CTXHOST_CONTEXT_WINDOW";
/// Environment variable for the assistant reply character budget
pub const ENV_REPLY_BUDGET: &str = "CTXHOST_REPLY_BUDGET";
/// Environment variable for the handler timeout in milliseconds
pub const ENV_HANDLER_TIMEOUT_MS: &str = "CTXHOST_HANDLER_TIMEOUT_MS";

/// Configuration shared by the store and the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Directory holding one JSON record per session
    #[serde(default = "default_context_dir")]
    pub context_dir: PathBuf,

    /// Interactions rendered into a handler's context window
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Characters of each assistant reply kept in a context window
    #[serde(default = "default_reply_char_budget")]
    pub reply_char_budget: usize,

    /// Upper bound on a single handler invocation (none by default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_timeout_ms: Option<u64>,
}

fn default_context_dir() -> PathBuf {
    PathBuf::from("context")
}

fn default_context_window() -> usize {
    5
}

fn default_reply_char_budget() -> usize {
    200
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            context_dir: default_context_dir(),
            context_window: default_context_window(),
            reply_char_budget: default_reply_char_budget(),
            handler_timeout_ms: None,
        }
    }
}

impl CoreConfig {
    /// Create a new configuration builder
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Build from the `CTXHOST_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    ///
    /// Unparseable values are ignored with a warning and the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut builder = Self::builder();

        if let Some(dir) = lookup(ENV_CONTEXT_DIR).filter(|v| !v.trim().is_empty()) {
            builder = builder.context_dir(dir);
        }
        if let Some(n) = parse_var(&lookup, ENV_CONTEXT_WINDOW) {
            builder = builder.context_window(n);
        }
        if let Some(n) = parse_var(&lookup, ENV_REPLY_BUDGET) {
            builder = builder.reply_char_budget(n);
        }
        if let Some(ms) = parse_var(&lookup, ENV_HANDLER_TIMEOUT_MS) {
            builder = builder.handler_timeout(Duration::from_millis(ms));
        }

        builder.build()
    }

    /// Handler timeout as a duration
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}

/// Builder for CoreConfig
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    context_dir: Option<PathBuf>,
    context_window: Option<usize>,
    reply_char_budget: Option<usize>,
    handler_timeout: Option<Duration>,
}

impl CoreConfigBuilder {
    /// Set the session directory
    pub fn context_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context_dir = Some(dir.into());
        self
    }

    /// Set the default context window size
    pub fn context_window(mut self, interactions: usize) -> Self {
        self.context_window = Some(interactions);
        self
    }

    /// Set the reply character budget
    pub fn reply_char_budget(mut self, chars: usize) -> Self {
        self.reply_char_budget = Some(chars);
        self
    }

    /// Bound each handler invocation
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Build the configuration
    pub fn build(self) -> CoreConfig {
        CoreConfig {
            context_dir: self.context_dir.unwrap_or_else(default_context_dir),
            context_window: self.context_window.unwrap_or_else(default_context_window),
            reply_char_budget: self
                .reply_char_budget
                .unwrap_or_else(default_reply_char_budget),
            handler_timeout_ms: self
                .handler_timeout
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}
