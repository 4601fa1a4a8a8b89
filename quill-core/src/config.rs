use crate::error::QuillError;
use figment::{Figment, providers::{Env, Format, Yaml}};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level Quill configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuillConfig {
    #[serde(default)]
    pub access_log: AccessLogConfig,
    #[serde(default)]
    pub scribe: ScribeConfig,
}

/// Access-log valve settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Format string, or one of the `common` / `combined` aliases.
    #[serde(default = "default_pattern")]
    pub pattern: String,
    /// Skip the line when the request carries an attribute with this name.
    #[serde(default)]
    pub condition: Option<String>,
    /// Name the rendered lines are logged under. Required at start.
    #[serde(default)]
    pub logger_name: Option<String>,
}

/// Remote collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScribeConfig {
    #[serde(default = "default_remote_host")]
    pub remote_host: String,
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,
    #[serde(default = "default_category")]
    pub category: String,
    /// Overrides host name discovery for the `[host]` message prefix.
    #[serde(default)]
    pub local_hostname: Option<String>,
    /// Number of error causes kept after the root error.
    #[serde(default = "default_stack_trace_depth")]
    pub stack_trace_depth: usize,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub io_timeout_ms: Option<u64>,
}

// ── Defaults ──────────────────────────────────────────────────

pub const DEFAULT_REMOTE_HOST: &str = "127.0.0.1";
pub const DEFAULT_REMOTE_PORT: u16 = 1463;
pub const DEFAULT_CATEGORY: &str = "default";
pub const DEFAULT_STACK_TRACE_DEPTH: usize = 1;

fn default_true() -> bool { true }
fn default_pattern() -> String { "common".into() }
fn default_remote_host() -> String { DEFAULT_REMOTE_HOST.into() }
fn default_remote_port() -> u16 { DEFAULT_REMOTE_PORT }
fn default_category() -> String { DEFAULT_CATEGORY.into() }
fn default_stack_trace_depth() -> usize { DEFAULT_STACK_TRACE_DEPTH }

// ── Impls ─────────────────────────────────────────────────────

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pattern: default_pattern(),
            condition: None,
            logger_name: None,
        }
    }
}

impl Default for ScribeConfig {
    fn default() -> Self {
        Self {
            remote_host: default_remote_host(),
            remote_port: default_remote_port(),
            category: default_category(),
            local_hostname: None,
            stack_trace_depth: default_stack_trace_depth(),
            connect_timeout_ms: None,
            io_timeout_ms: None,
        }
    }
}

impl QuillConfig {
    /// Load configuration from YAML file + env overrides, then validate.
    pub fn load(path: &Path) -> Result<Self, QuillError> {
        let config: QuillConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("QUILL_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), QuillError> {
        self.scribe.validate()
    }
}

impl ScribeConfig {
    /// Reject values that would only fail later, once traffic flows.
    pub fn validate(&self) -> Result<(), QuillError> {
        if self.category.is_empty() {
            return Err(QuillError::Config("category must not be empty".into()));
        }
        if self.remote_host.is_empty() {
            return Err(QuillError::Config("remote host must not be empty".into()));
        }
        if self.remote_port == 0 {
            return Err(QuillError::Config("remote port must be a positive integer".into()));
        }
        if self.connect_timeout_ms == Some(0) {
            return Err(QuillError::Config("connect timeout must be a positive number of milliseconds".into()));
        }
        if self.io_timeout_ms == Some(0) {
            return Err(QuillError::Config("io timeout must be a positive number of milliseconds".into()));
        }
        if let Some(ref host) = self.local_hostname {
            if host.contains(['\r', '\n']) {
                return Err(QuillError::Config("local hostname must be a single line".into()));
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}
