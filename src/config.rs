use crate::error::{StepTrackerError, TrackerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tunables for the peak-based step detector.
///
/// Defaults are tuned for slow gait at ~20 Hz: a low change threshold so
/// shuffling still registers, and a 250 ms debounce (max ~4 steps/sec).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Magnitude must exceed the rolling average by this much (m/s²)
    pub peak_threshold: f64,
    /// Minimum change from the previous magnitude (m/s²)
    pub change_threshold: f64,
    /// Minimum time between accepted steps
    pub min_step_interval_ms: i64,
    /// Rolling history length
    pub buffer_capacity: usize,
    /// Samples required before any decision is made
    pub min_window: usize,
    /// Trailing samples the current magnitude must dominate
    pub peak_window: usize,
    /// Requested accelerometer rate
    pub sample_rate_hz: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            peak_threshold: 5.0,
            change_threshold: 1.0,
            min_step_interval_ms: 250,
            buffer_capacity: 20,
            min_window: 5,
            peak_window: 3,
            sample_rate_hz: 20.0,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> TrackerResult<()> {
        if self.buffer_capacity == 0 {
            return Err(invalid("buffer_capacity must be at least 1"));
        }
        if self.min_window == 0 || self.min_window > self.buffer_capacity {
            return Err(invalid(format!(
                "min_window must be in 1..={} (got {})",
                self.buffer_capacity, self.min_window
            )));
        }
        if self.peak_window == 0 || self.peak_window > self.buffer_capacity {
            return Err(invalid(format!(
                "peak_window must be in 1..={} (got {})",
                self.buffer_capacity, self.peak_window
            )));
        }
        if !(self.peak_threshold >= 0.0) || !(self.change_threshold >= 0.0) {
            return Err(invalid("thresholds must be non-negative"));
        }
        if self.min_step_interval_ms < 0 {
            return Err(invalid("min_step_interval_ms must be non-negative"));
        }
        if !(self.sample_rate_hz > 0.0) {
            return Err(invalid("sample_rate_hz must be positive"));
        }
        Ok(())
    }

    /// Nominal spacing between samples at the configured rate
    pub fn sample_interval_ms(&self) -> u64 {
        (1000.0 / self.sample_rate_hz).round().max(1.0) as u64
    }
}

/// Top-level tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub detector: DetectorConfig,
    /// `dataOrigin` stamped on every written record
    pub data_origin: String,
    /// Capacity of the sample channel between source and session
    pub channel_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            data_origin: "com.coffeeApp.package".to_string(),
            channel_capacity: 500,
        }
    }
}

impl TrackerConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> TrackerResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            StepTrackerError::StorageError(format!("{}: {}", path.display(), e))
        })?;
        let config: TrackerConfig = serde_json::from_str(&text)
            .map_err(|e| invalid(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        self.detector.validate()?;
        if self.data_origin.trim().is_empty() {
            return Err(invalid("data_origin must not be empty"));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> StepTrackerError {
    StepTrackerError::InvalidParameters(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.detector.buffer_capacity, 20);
        assert_eq!(config.detector.min_window, 5);
        assert_eq!(config.detector.sample_interval_ms(), 50);
    }

    #[test]
    fn test_rejects_window_larger_than_buffer() {
        let config = DetectorConfig {
            min_window: 30,
            ..DetectorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StepTrackerError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_rejects_bad_values() {
        let zero_peak = DetectorConfig {
            peak_window: 0,
            ..DetectorConfig::default()
        };
        assert!(zero_peak.validate().is_err());

        let negative = DetectorConfig {
            change_threshold: -1.0,
            ..DetectorConfig::default()
        };
        assert!(negative.validate().is_err());

        let no_rate = DetectorConfig {
            sample_rate_hz: 0.0,
            ..DetectorConfig::default()
        };
        assert!(no_rate.validate().is_err());

        let nan_threshold = DetectorConfig {
            peak_threshold: f64::NAN,
            ..DetectorConfig::default()
        };
        assert!(nan_threshold.validate().is_err());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"detector": {{"peak_threshold": 3.5}}, "data_origin": "com.example.steps"}}"#
        )
        .unwrap();

        let config = TrackerConfig::load(file.path()).unwrap();
        assert_eq!(config.detector.peak_threshold, 3.5);
        assert_eq!(config.detector.min_step_interval_ms, 250);
        assert_eq!(config.data_origin, "com.example.steps");
        assert_eq!(config.channel_capacity, 500);
    }

    #[test]
    fn test_load_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"detector": {{"min_window": 0}}}}"#).unwrap();
        assert!(TrackerConfig::load(file.path()).is_err());
    }
}
