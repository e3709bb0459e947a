use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DEFAULT_MAX_ITERATIONS, DEFAULT_NODE_PATH, DEFAULT_PYTHON_COLD_START_GRACE_MS,
    DEFAULT_PYTHON_PATH, DEFAULT_TIMEOUT_MS,
};
use crate::core::domain::ExecutionConfig;
use crate::core::errors::RunnerError;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Process-wide runner settings. Every field has a default, so a settings
/// file only needs the keys it changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub timeout_ms: u64,
    pub max_iterations: u64,
    /// Added to the timeout until the Python runtime has loaded once.
    pub python_cold_start_grace_ms: u64,
    pub node_path: PathBuf,
    pub python_path: PathBuf,
    pub python_loop_guard: bool,
    /// Construct the Python executor on first use instead of requiring
    /// `preload_python`.
    pub auto_load_python: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            python_cold_start_grace_ms: DEFAULT_PYTHON_COLD_START_GRACE_MS,
            node_path: DEFAULT_NODE_PATH.into(),
            python_path: DEFAULT_PYTHON_PATH.into(),
            python_loop_guard: false,
            auto_load_python: false,
        }
    }
}

impl RunnerSettings {
    pub fn from_toml_str(s: &str) -> Result<Self, SettingsError> {
        let settings: RunnerSettings = toml::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load<T: AsRef<Path>>(path: T) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Applies `CODERUNNER_*` environment variables on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self, SettingsError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("CODERUNNER_TIMEOUT_MS") {
            self.timeout_ms = parse_value("CODERUNNER_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("CODERUNNER_MAX_ITERATIONS") {
            self.max_iterations = parse_value("CODERUNNER_MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = lookup("CODERUNNER_PYTHON_GRACE_MS") {
            self.python_cold_start_grace_ms = parse_value("CODERUNNER_PYTHON_GRACE_MS", &value)?;
        }
        if let Some(value) = lookup("CODERUNNER_NODE_PATH") {
            self.node_path = value.into();
        }
        if let Some(value) = lookup("CODERUNNER_PYTHON_PATH") {
            self.python_path = value.into();
        }
        if let Some(value) = lookup("CODERUNNER_PYTHON_LOOP_GUARD") {
            self.python_loop_guard = parse_value("CODERUNNER_PYTHON_LOOP_GUARD", &value)?;
        }
        if let Some(value) = lookup("CODERUNNER_AUTO_LOAD_PYTHON") {
            self.auto_load_python = parse_value("CODERUNNER_AUTO_LOAD_PYTHON", &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.timeout_ms == 0 {
            return Err(SettingsError::InvalidValue {
                key: "timeout_ms".to_string(),
                value: "0".to_string(),
            });
        }
        if self.max_iterations == 0 {
            return Err(SettingsError::InvalidValue {
                key: "max_iterations".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Defaults inherited by every execution that does not override them.
    pub fn execution_defaults(&self) -> Result<ExecutionConfig, RunnerError> {
        ExecutionConfig::new(self.timeout_ms, self.max_iterations)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}
