//! # Configuration Module
//!
//! Settings for the detector and the stream controller. Both structs
//! deserialize from JSON with every field optional, falling back to the
//! defaults below, and are validated before use.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Default lower bound of the analyzed band (low male voice).
pub const DEFAULT_MIN_FREQUENCY: f64 = 80.0;

/// Default upper bound of the analyzed band (high soprano).
pub const DEFAULT_MAX_FREQUENCY: f64 = 1000.0;

/// Default minimum raw correlation a peak must exceed.
pub const DEFAULT_CORRELATION_THRESHOLD: f64 = 0.01;

/// Detector settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Lowest frequency the detector will report, in Hz.
    pub min_frequency: f64,
    /// Highest frequency the detector will report, in Hz.
    pub max_frequency: f64,
    /// A peak must be strictly greater than this raw (unnormalized)
    /// correlation value to count as a pitch.
    pub correlation_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_frequency: DEFAULT_MIN_FREQUENCY,
            max_frequency: DEFAULT_MAX_FREQUENCY,
            correlation_threshold: DEFAULT_CORRELATION_THRESHOLD,
        }
    }
}

impl DetectorConfig {
    /// Creates a config for the given band with the default threshold.
    pub fn with_band(min_frequency: f64, max_frequency: f64) -> Self {
        Self {
            min_frequency,
            max_frequency,
            ..Self::default()
        }
    }

    /// Checks `0 < min_frequency < max_frequency` and a usable threshold.
    pub fn validate(&self) -> Result<()> {
        if !self.min_frequency.is_finite() || !self.max_frequency.is_finite() {
            return Err(Error::invalid_config("frequency bounds must be finite"));
        }
        if self.min_frequency <= 0.0 {
            return Err(Error::invalid_config(format!(
                "min_frequency must be positive, got {}",
                self.min_frequency
            )));
        }
        if self.min_frequency >= self.max_frequency {
            return Err(Error::invalid_config(format!(
                "min_frequency ({}) must be below max_frequency ({})",
                self.min_frequency, self.max_frequency
            )));
        }
        if !self.correlation_threshold.is_finite() || self.correlation_threshold < 0.0 {
            return Err(Error::invalid_config(format!(
                "correlation_threshold must be finite and non-negative, got {}",
                self.correlation_threshold
            )));
        }
        Ok(())
    }
}

/// What happens to the published estimate when a buffer yields no pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    /// Keep showing the last detected pitch until the controller stops.
    #[default]
    Hold,
    /// Clear the estimate as soon as a buffer fails to detect.
    Clear,
}

/// Where buffer analysis runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    /// Analyze synchronously inside the source's delivery callback.
    #[default]
    Inline,
    /// Copy each buffer and analyze it on a dedicated thread. Buffers are
    /// dropped when `queue_depth` copies are already waiting.
    Worker { queue_depth: usize },
}

/// Stream controller settings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub detector: DetectorConfig,
    pub miss_policy: MissPolicy,
    pub dispatch: Dispatch,
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        if let Dispatch::Worker { queue_depth: 0 } = self.dispatch {
            return Err(Error::invalid_config("worker queue_depth must be at least 1"));
        }
        Ok(())
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
