//! Monitor configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Sampling cadence and idle timeout for monitoring sessions.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SamplingConfig {
    /// Interval between two samples, and the keep-alive debounce window.
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    /// Time without keep-alive after which a session stops itself.
    #[serde(default = "default_max_idle_ms")]
    pub max_idle_ms: u64,
}

fn default_period_ms() -> u64 {
    500
}

fn default_max_idle_ms() -> u64 {
    2000
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            max_idle_ms: default_max_idle_ms(),
        }
    }
}

fn default_results_root() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\app\results")
    } else {
        PathBuf::from("/app/results")
    }
}

/// Top-level configuration parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Directory receiving one `<test>_<index>.csv` log per session.
    #[serde(default = "default_results_root")]
    pub results_root: PathBuf,
    /// Sampling thresholds.
    #[serde(default)]
    pub sampling: SamplingConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            results_root: default_results_root(),
            sampling: SamplingConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Sampling period as a [`Duration`].
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.sampling.period_ms)
    }

    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.sampling.max_idle_ms)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.sampling.period_ms == 0 {
            return Err(AppError::Config(
                "sampling.period_ms must be greater than zero".into(),
            ));
        }

        if self.sampling.max_idle_ms == 0 {
            return Err(AppError::Config(
                "sampling.max_idle_ms must be greater than zero".into(),
            ));
        }

        if self.results_root.as_os_str().is_empty() {
            return Err(AppError::Config("results_root must not be empty".into()));
        }

        Ok(())
    }
}
