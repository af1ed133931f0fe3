//! Executor configuration.
//!
//! Configuration is JSON, passed either through the `CODE_SANDBOX_CONFIG`
//! environment variable or a file given on the command line. Languages that
//! are not mentioned run with defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::detect::{self, JAVASCRIPT};

/// Environment variable holding the JSON configuration.
pub const CONFIG_ENV_VAR: &str = "CODE_SANDBOX_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Per-language settings, keyed by language name or alias.
    #[serde(default)]
    pub executors: HashMap<String, ExecutorConfig>,
}

/// Settings for a single language executor. Fixed once the executor is built.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Set to false to skip registering this executor.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Explicit interpreter path or program name. Falls back to the
    /// platform default for the language when absent.
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Timeout applied when the caller does not pass one.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Best-effort memory ceiling in megabytes.
    #[serde(default)]
    pub memory_mb: Option<u64>,

    /// Dedicated working directory. Defaults to `<tmp>/code-sandbox/<language>`.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Modules the language is expected to use. Informational only; the
    /// denylist is what actually gates execution.
    #[serde(default)]
    pub allowed_modules: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interpreter: None,
            timeout_seconds: default_timeout(),
            memory_mb: None,
            work_dir: None,
            allowed_modules: Vec::new(),
        }
    }
}

impl ExecutorConfig {
    /// Memory ceiling in bytes, using the language default when unset.
    pub fn memory_limit_bytes(&self, language: &str) -> u64 {
        self.memory_mb.unwrap_or_else(|| default_memory_mb(language)) * 1024 * 1024
    }

    /// Working directory, using the shared temp location when unset.
    pub fn resolved_work_dir(&self, language: &str) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir()
                .join("code-sandbox")
                .join(language)
        })
    }
}

impl Config {
    /// Load configuration from `CODE_SANDBOX_CONFIG`, or defaults if unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(json) => Self::from_json(&json)
                .with_context(|| format!("Failed to parse {CONFIG_ENV_VAR}")),
            Err(_) => {
                debug!("{CONFIG_ENV_VAR} not set, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&json)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }

    /// Settings for `language`, matching keys through language aliases.
    pub fn executor(&self, language: &str) -> ExecutorConfig {
        self.executors
            .iter()
            .find(|(name, _)| detect::normalize_language(name) == language)
            .map(|(_, config)| config.clone())
            .unwrap_or_default()
    }
}

const fn default_enabled() -> bool {
    true
}

const fn default_timeout() -> u64 {
    30
}

/// V8 needs far more headroom than the other runtimes.
fn default_memory_mb(language: &str) -> u64 {
    if language == JAVASCRIPT {
        1024
    } else {
        512
    }
}

/// Default allow-list reported for a language when none is configured.
pub fn default_allowed_modules(language: &str) -> Vec<String> {
    let modules: &[&str] = match language {
        detect::PYTHON => &[
            "math", "random", "datetime", "json", "re", "collections", "itertools",
            "functools", "string", "statistics", "decimal", "fractions", "time",
        ],
        detect::JAVASCRIPT => &["assert", "buffer", "crypto", "events", "path", "url", "util"],
        _ => &[],
    };
    modules.iter().map(ToString::to_string).collect()
}
