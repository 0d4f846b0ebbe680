use crate::error::{Result, StepTrackerError};
use serde::{Deserialize, Serialize};

/// Batched persistence cadence.
///
/// A flush is due each time the running count crosses a multiple of
/// `batch_size`. That bounds writes to `count / batch_size` per session and
/// staleness of the stored record to `batch_size - 1` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushPolicy {
    batch_size: u64,
}

impl FlushPolicy {
    pub fn new(batch_size: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(StepTrackerError::InvalidParameters(
                "flush batch size must be at least 1".to_string(),
            ));
        }
        Ok(Self { batch_size })
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Count to persist when going from `previous` to `current`, if a multiple was crossed
    pub fn crossed(&self, previous: u64, current: u64) -> Option<u64> {
        (current / self.batch_size > previous / self.batch_size).then_some(current)
    }
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}
