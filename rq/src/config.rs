//! ratequeue configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::scheduler::{DEFAULT_SAFETY_MARGIN, RateOptions, SchedulerConfig};

/// Main ratequeue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rate limit applied to submitted work
    pub rate: RateOptions,

    /// Extra delay added to every scheduler wait, in milliseconds
    #[serde(rename = "safety-margin-ms")]
    pub safety_margin_ms: u64,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// How `rq run` executes command lines
    pub runner: RunnerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate: RateOptions::default(),
            safety_margin_ms: DEFAULT_SAFETY_MARGIN.as_millis() as u64,
            log_level: None,
            runner: RunnerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .ratequeue.yml
        let local_config = PathBuf::from(".ratequeue.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/ratequeue/ratequeue.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ratequeue").join("ratequeue.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    ///
    /// Any failure yields `None`; the full load reports it later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => [
                Some(PathBuf::from(".ratequeue.yml")),
                dirs::config_dir().map(|dir| dir.join("ratequeue").join("ratequeue.yml")),
            ]
            .into_iter()
            .flatten()
            .find(|path| path.exists())?,
        };

        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }

    /// Scheduler configuration, with `overrides` taking precedence over the file
    pub fn scheduler_config(&self, overrides: &RateOptions) -> SchedulerConfig {
        debug!(?overrides, "Config::scheduler_config: called");
        SchedulerConfig::from_options(&self.rate.merged_with(overrides)).with_safety_margin(self.safety_margin())
    }
}

/// Command runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Shell used to run each command line as `<shell> -c <line>`
    pub shell: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}
