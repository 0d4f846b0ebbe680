//! Peak/threshold step detector.
//!
//! A sample counts as a step when its acceleration magnitude exceeds a fixed
//! threshold and at least one debounce interval has passed since the last
//! accepted step. The debounce window swallows the multi-sample signature of a
//! single footfall. Periodic non-walking motion (e.g. vehicle vibration) above
//! the threshold is counted too; the detector does not look at cadence.

use crate::sensors::MotionSample;
use serde::{Deserialize, Serialize};

/// Calibration constants for step detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepDetectorConfig {
    /// Magnitude a sample must exceed to count (g-like units of the source).
    pub magnitude_threshold: f64,
    /// Minimum time between two accepted steps in milliseconds.
    pub debounce_ms: i64,
}

impl Default for StepDetectorConfig {
    fn default() -> Self {
        Self {
            magnitude_threshold: 1.2,
            debounce_ms: 300,
        }
    }
}

impl StepDetectorConfig {
    /// Plain threshold counter: higher threshold, no debounce.
    pub fn threshold_only() -> Self {
        Self {
            magnitude_threshold: 1.5,
            debounce_ms: 0,
        }
    }
}

/// An accepted step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    /// Running count after this step.
    pub step_number: u64,
    pub timestamp_ms: i64,
    pub magnitude: f64,
}

pub struct StepDetector {
    config: StepDetectorConfig,
    total_steps: u64,
    last_step_ms: Option<i64>,
    metrics_stale: bool,
}

impl StepDetector {
    pub fn new(config: StepDetectorConfig) -> Self {
        Self {
            config,
            total_steps: 0,
            last_step_ms: None,
            metrics_stale: false,
        }
    }

    pub fn config(&self) -> &StepDetectorConfig {
        &self.config
    }

    /// Process a single sample. Returns the step event if it was accepted.
    pub fn process_sample(&mut self, sample: &MotionSample) -> Option<StepEvent> {
        let magnitude = sample.magnitude();

        // NaN never compares greater, but +inf would
        if !magnitude.is_finite() || magnitude <= self.config.magnitude_threshold {
            return None;
        }

        if let Some(last) = self.last_step_ms {
            if sample.timestamp_ms < last {
                return None;
            }
            if sample.timestamp_ms.saturating_sub(last) < self.config.debounce_ms {
                return None;
            }
        }

        self.total_steps += 1;
        self.last_step_ms = Some(sample.timestamp_ms);
        self.metrics_stale = true;

        Some(StepEvent {
            step_number: self.total_steps,
            timestamp_ms: sample.timestamp_ms,
            magnitude,
        })
    }

    /// Process a batch of samples and return all accepted steps.
    pub fn process_batch(&mut self, samples: &[MotionSample]) -> Vec<StepEvent> {
        samples
            .iter()
            .filter_map(|sample| self.process_sample(sample))
            .collect()
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn last_step_ms(&self) -> Option<i64> {
        self.last_step_ms
    }

    pub fn metrics_stale(&self) -> bool {
        self.metrics_stale
    }

    /// Returns whether derived metrics need recomputing and clears the flag.
    pub fn take_stale(&mut self) -> bool {
        std::mem::take(&mut self.metrics_stale)
    }

    /// Start over from `baseline` (resumed session or new day).
    pub fn reset_to(&mut self, baseline: u64) {
        self.total_steps = baseline;
        self.last_step_ms = None;
        self.metrics_stale = true;
    }
}

impl Default for StepDetector {
    fn default() -> Self {
        Self::new(StepDetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sample whose magnitude is exactly `m`
    fn sample(m: f64, t: i64) -> MotionSample {
        MotionSample::new(0.0, 0.0, m, t)
    }

    #[test]
    fn test_debounce_scenario() {
        let mut detector = StepDetector::default();
        let samples = vec![
            sample(0.5, 0),
            sample(1.6, 100),
            sample(1.7, 150),
            sample(1.8, 500),
        ];

        let steps = detector.process_batch(&samples);

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].timestamp_ms, 100);
        assert_eq!(steps[1].timestamp_ms, 500);
        assert_eq!(detector.total_steps(), 2);
    }

    #[test]
    fn test_sub_threshold_never_counts() {
        let mut detector = StepDetector::default();
        for i in 0..1000 {
            assert!(detector.process_sample(&sample(1.19, i * 1000)).is_none());
            assert!(detector.process_sample(&sample(0.3, i * 1000 + 500)).is_none());
        }
        assert_eq!(detector.total_steps(), 0);
    }

    #[test]
    fn test_debounce_boundary_is_inclusive() {
        let mut detector = StepDetector::default();
        assert!(detector.process_sample(&sample(2.0, 1_000)).is_some());
        assert!(detector.process_sample(&sample(2.0, 1_299)).is_none());
        assert!(detector.process_sample(&sample(2.0, 1_300)).is_some());
    }

    #[test]
    fn test_first_step_at_time_zero() {
        let mut detector = StepDetector::default();
        let event = detector.process_sample(&sample(1.5, 0)).unwrap();
        assert_eq!(event.step_number, 1);
    }

    #[test]
    fn test_out_of_order_sample_rejected() {
        let mut detector = StepDetector::new(StepDetectorConfig::threshold_only());
        assert!(detector.process_sample(&sample(2.0, 5_000)).is_some());
        assert!(detector.process_sample(&sample(2.0, 4_000)).is_none());
        assert_eq!(detector.total_steps(), 1);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let mut detector = StepDetector::default();
        assert!(detector.process_sample(&sample(2.0, 1_000)).is_some());
        assert!(detector.process_sample(&sample(2.0, i64::MIN)).is_none());
        assert!(detector.process_sample(&sample(2.0, i64::MAX)).is_some());
        assert_eq!(detector.total_steps(), 2);

        let mut from_min = StepDetector::default();
        assert!(from_min.process_sample(&sample(2.0, i64::MIN)).is_some());
        assert!(from_min.process_sample(&sample(2.0, i64::MAX)).is_some());
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut detector = StepDetector::default();
        assert!(detector
            .process_sample(&MotionSample::new(f64::NAN, 0.0, 2.0, 0))
            .is_none());
        assert!(detector
            .process_sample(&MotionSample::new(f64::INFINITY, 0.0, 0.0, 0))
            .is_none());
    }

    #[test]
    fn test_threshold_only_counts_every_peak() {
        let mut detector = StepDetector::new(StepDetectorConfig::threshold_only());
        let samples: Vec<_> = (0..10).map(|i| sample(1.6, i * 10)).collect();
        assert_eq!(detector.process_batch(&samples).len(), 10);
        assert!(detector.process_sample(&sample(1.4, 1_000)).is_none());
    }

    #[test]
    fn test_count_is_monotonic() {
        let mut detector = StepDetector::default();
        let mut previous = 0;
        for i in 0..500i64 {
            let m = if i % 3 == 0 { 1.9 } else { 0.9 + (i % 7) as f64 * 0.1 };
            detector.process_sample(&sample(m, i * 37));
            assert!(detector.total_steps() >= previous);
            previous = detector.total_steps();
        }
    }

    #[test]
    fn test_reset_and_stale_flag() {
        let mut detector = StepDetector::default();
        assert!(!detector.take_stale());

        detector.process_sample(&sample(2.0, 0));
        assert!(detector.take_stale());
        assert!(!detector.metrics_stale());

        detector.reset_to(40);
        assert_eq!(detector.total_steps(), 40);
        assert_eq!(detector.last_step_ms(), None);
        assert!(detector.metrics_stale());

        let event = detector.process_sample(&sample(2.0, 10)).unwrap();
        assert_eq!(event.step_number, 41);
    }
}
