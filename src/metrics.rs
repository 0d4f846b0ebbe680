use serde::{Deserialize, Serialize};

/// Conversion rates from steps to the derived daily fields
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityRates {
    pub calories_per_step: f64,
    pub steps_per_active_minute: u64,
}

impl Default for ActivityRates {
    fn default() -> Self {
        Self {
            calories_per_step: 0.04,
            steps_per_active_minute: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub steps: u64,
    pub calories_burned: u64,
    pub active_minutes: u64,
}

impl ActivityRates {
    /// Recompute everything from the total; never incremental.
    pub fn derive(&self, steps: u64) -> DerivedMetrics {
        let active_minutes = if self.steps_per_active_minute == 0 {
            0
        } else {
            steps / self.steps_per_active_minute
        };

        DerivedMetrics {
            steps,
            calories_burned: (steps as f64 * self.calories_per_step).floor().max(0.0) as u64,
            active_minutes,
        }
    }
}

/// Daily targets shown on the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyGoals {
    pub steps: u64,
    pub calories: u64,
    pub active_minutes: u64,
}

impl Default for DailyGoals {
    fn default() -> Self {
        Self {
            steps: 10_000,
            calories: 500,
            active_minutes: 60,
        }
    }
}

/// Progress towards each goal in percent, clamped to [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalProgress {
    pub steps_pct: f64,
    pub calories_pct: f64,
    pub active_minutes_pct: f64,
}

impl DailyGoals {
    pub fn progress(&self, metrics: &DerivedMetrics) -> GoalProgress {
        GoalProgress {
            steps_pct: percent(metrics.steps, self.steps),
            calories_pct: percent(metrics.calories_burned, self.calories),
            active_minutes_pct: percent(metrics.active_minutes, self.active_minutes),
        }
    }
}

fn percent(value: u64, goal: u64) -> f64 {
    if goal == 0 {
        return 100.0;
    }
    (value as f64 / goal as f64 * 100.0).clamp(0.0, 100.0)
}
