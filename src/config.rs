use crate::detector::StepDetectorConfig;
use crate::error::{Result, StepTrackerError};
use crate::flush::FlushPolicy;
use crate::metrics::{ActivityRates, DailyGoals};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    pub batch_size: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub sample_rate_hz: f64,
    pub channel_capacity: usize,
    /// Cadence of the simulated walker (steps/sec)
    pub simulated_cadence_hz: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 50.0,
            channel_capacity: 500,
            simulated_cadence_hz: 1.8,
        }
    }
}

/// Tracker settings, loadable from a JSON file. Missing fields take defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub detector: StepDetectorConfig,
    pub flush: FlushConfig,
    pub rates: ActivityRates,
    pub goals: DailyGoals,
    pub sensor: SensorConfig,
}

impl TrackerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| StepTrackerError::Config(format!("{}: {}", path.display(), e)))?;
        let config: TrackerConfig = serde_json::from_str(&text)
            .map_err(|e| StepTrackerError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.detector.magnitude_threshold > 0.0) {
            return Err(StepTrackerError::Config(
                "detector.magnitude_threshold must be positive".to_string(),
            ));
        }
        if self.detector.debounce_ms < 0 {
            return Err(StepTrackerError::Config(
                "detector.debounce_ms must not be negative".to_string(),
            ));
        }
        if self.flush.batch_size == 0 {
            return Err(StepTrackerError::Config(
                "flush.batch_size must be at least 1".to_string(),
            ));
        }
        if self.rates.steps_per_active_minute == 0 {
            return Err(StepTrackerError::Config(
                "rates.steps_per_active_minute must be at least 1".to_string(),
            ));
        }
        if !(self.sensor.sample_rate_hz > 0.0) || self.sensor.channel_capacity == 0 {
            return Err(StepTrackerError::Config(
                "sensor.sample_rate_hz and sensor.channel_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn flush_policy(&self) -> Result<FlushPolicy> {
        FlushPolicy::new(self.flush.batch_size)
    }
}
