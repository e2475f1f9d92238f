//! Scheduler configuration

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Executions admitted per window when nothing usable is configured
pub const DEFAULT_MAX_EXECUTIONS: u32 = 1;

/// Window length in seconds when nothing usable is configured
pub const DEFAULT_WINDOW_SECS: f64 = 1.0;

/// Extra delay added to every computed wait to absorb timer jitter
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_millis(50);

/// Rate options as supplied by the caller or a config file
///
/// Nothing here is validated; [`SchedulerConfig::from_options`] substitutes
/// the defaults for absent or unusable values instead of failing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateOptions {
    /// Executions allowed per window
    #[serde(
        rename = "no-requests",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_requests"
    )]
    pub no_requests: Option<i64>,

    /// Window length in seconds
    #[serde(
        rename = "per-number-of-seconds",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_seconds"
    )]
    pub per_number_of_seconds: Option<f64>,
}

/// Whole numbers only; anything else is dropped so the default applies
fn lenient_requests<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::Number(n) if n.is_i64() => n.as_i64(),
        Value::Number(n) if n.is_u64() => Some(i64::MAX),
        other => {
            warn!(value = ?other, "no-requests is not a whole number, using {}", DEFAULT_MAX_EXECUTIONS);
            None
        }
    })
}

/// Any number is kept for validation later; non-numbers are dropped
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::Number(n) => n.as_f64(),
        other => {
            warn!(value = ?other, "per-number-of-seconds is not a number, using {}", DEFAULT_WINDOW_SECS);
            None
        }
    })
}

impl RateOptions {
    pub fn new(no_requests: i64, per_number_of_seconds: f64) -> Self {
        Self {
            no_requests: Some(no_requests),
            per_number_of_seconds: Some(per_number_of_seconds),
        }
    }

    /// Overlay `other` on top of `self`, keeping our values where `other` is silent
    pub fn merged_with(&self, other: &RateOptions) -> Self {
        Self {
            no_requests: other.no_requests.or(self.no_requests),
            per_number_of_seconds: other.per_number_of_seconds.or(self.per_number_of_seconds),
        }
    }
}

/// Validated scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Executions admitted per window, always > 0
    pub max_executions: u32,

    /// Window length, always > 0
    pub window: Duration,

    /// Added to every armed timer
    pub safety_margin: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_executions: DEFAULT_MAX_EXECUTIONS,
            window: Duration::from_secs_f64(DEFAULT_WINDOW_SECS),
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

impl SchedulerConfig {
    /// Build a config from loose options, falling back to 1 per 1s
    pub fn from_options(options: &RateOptions) -> Self {
        debug!(?options, "SchedulerConfig::from_options: called");
        let max_executions = match options.no_requests {
            Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
            Some(n) => {
                warn!(no_requests = n, "no-requests must be positive, using {}", DEFAULT_MAX_EXECUTIONS);
                DEFAULT_MAX_EXECUTIONS
            }
            None => DEFAULT_MAX_EXECUTIONS,
        };

        let window = match options.per_number_of_seconds {
            Some(secs) if secs > 0.0 => match Duration::try_from_secs_f64(secs) {
                Ok(window) if !window.is_zero() => window,
                _ => {
                    warn!(secs, "per-number-of-seconds is out of range, using {}", DEFAULT_WINDOW_SECS);
                    Duration::from_secs_f64(DEFAULT_WINDOW_SECS)
                }
            },
            Some(secs) => {
                warn!(secs, "per-number-of-seconds must be positive, using {}", DEFAULT_WINDOW_SECS);
                Duration::from_secs_f64(DEFAULT_WINDOW_SECS)
            }
            None => Duration::from_secs_f64(DEFAULT_WINDOW_SECS),
        };

        Self {
            max_executions,
            window,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }

    pub fn with_safety_margin(mut self, safety_margin: Duration) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    /// Minimum spacing between consecutive execution starts
    pub fn min_interval(&self) -> Duration {
        self.window / self.max_executions
    }
}
