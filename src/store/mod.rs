pub mod file;
pub mod memory;
pub mod rest;

pub use file::JsonFileActivityStore;
pub use memory::{MemoryActivityStore, WriteAttempt};
pub use rest::RestActivityStore;

use crate::error::Result;
use crate::metrics::ActivityRates;
use chrono::NaiveDate;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Step-owned fields of a day's activity record, as written by a flush
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub user_id: String,
    pub date: NaiveDate,
    pub steps: u64,
    pub calories_burned: u64,
    pub active_minutes: u64,
}

impl ActivityRecord {
    /// Build the upsert payload; derived fields come from the total, not increments
    pub fn from_steps(user_id: &str, date: NaiveDate, steps: u64, rates: &ActivityRates) -> Self {
        let derived = rates.derive(steps);
        Self {
            user_id: user_id.to_string(),
            date,
            steps,
            calories_burned: derived.calories_burned,
            active_minutes: derived.active_minutes,
        }
    }
}

/// Full stored row. `sleep_hours` belongs to the wider app and is never
/// touched by an upsert after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredActivity {
    pub user_id: String,
    pub date: NaiveDate,
    pub steps: u64,
    pub calories_burned: u64,
    pub active_minutes: u64,
    pub sleep_hours: f64,
}

impl StoredActivity {
    pub fn created_from(record: &ActivityRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            date: record.date,
            steps: record.steps,
            calories_burned: record.calories_burned,
            active_minutes: record.active_minutes,
            sleep_hours: 0.0,
        }
    }

    /// Overwrite the step-owned fields
    pub fn apply(&mut self, record: &ActivityRecord) {
        self.steps = record.steps;
        self.calories_burned = record.calories_burned;
        self.active_minutes = record.active_minutes;
    }
}

/// Daily activity persistence keyed by (user, date).
///
/// Upserts must be idempotent: replaying the same record converges to the
/// same stored state.
pub trait ActivityStore: Send + Sync {
    fn upsert<'a>(&'a self, record: &'a ActivityRecord) -> BoxFuture<'a, Result<()>>;

    /// Persisted step count for the day, if a record exists
    fn load_steps<'a>(&'a self, user_id: &'a str, date: NaiveDate)
        -> BoxFuture<'a, Result<Option<u64>>>;
}
