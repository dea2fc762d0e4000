use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Queue configuration, deserializable from TOML.
///
/// ```toml
/// capacity = 4
/// max_waiting = 500
/// default_processing_secs = 90.0
/// smoothing = 0.2
/// record_durations = true
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Units of work allowed to run at the same time.
    pub capacity: usize,
    /// Upper bound on waiting entries. `None` means unbounded.
    pub max_waiting: Option<usize>,
    /// Seed of the processing-time moving average, in seconds.
    pub default_processing_secs: f64,
    /// Weight of a new observation in the moving average.
    pub smoothing: f64,
    /// Feed the moving average from the dispatch path. Turn off when durations
    /// are reported manually through `report_duration`.
    pub record_durations: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            max_waiting: None,
            default_processing_secs: 90.0,
            smoothing: 0.2,
            record_durations: true,
        }
    }
}

impl QueueConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be at least 1".into()));
        }
        if self.max_waiting == Some(0) {
            return Err(ConfigError::Invalid("max_waiting must be at least 1".into()));
        }
        if !(self.default_processing_secs.is_finite() && self.default_processing_secs > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "default_processing_secs must be positive, got {}",
                self.default_processing_secs
            )));
        }
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "smoothing must be in (0, 1], got {}",
                self.smoothing
            )));
        }
        Ok(())
    }
}
