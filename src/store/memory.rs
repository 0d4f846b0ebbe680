use super::{ActivityRecord, ActivityStore, StoredActivity};
use crate::error::{Result, StepTrackerError};
use chrono::NaiveDate;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Outcome of one upsert, reported to write observers
#[derive(Debug, Clone, PartialEq)]
pub struct WriteAttempt {
    pub record: ActivityRecord,
    pub succeeded: bool,
}

/// In-process store. Can be switched into a failing mode to mimic a backend outage.
#[derive(Default)]
pub struct MemoryActivityStore {
    records: Mutex<HashMap<(String, NaiveDate), StoredActivity>>,
    writes: AtomicU64,
    failed_writes: AtomicU64,
    failing: AtomicBool,
    observers: Mutex<Vec<UnboundedSender<WriteAttempt>>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str, date: NaiveDate) -> Option<StoredActivity> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(&(user_id.to_string(), date)).cloned())
    }

    pub fn insert(&self, stored: StoredActivity) {
        if let Ok(mut records) = self.records.lock() {
            records.insert((stored.user_id.clone(), stored.date), stored);
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful upserts so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn failed_write_count(&self) -> u64 {
        self.failed_writes.load(Ordering::SeqCst)
    }

    /// Receive every upsert attempt from now on
    pub fn watch_writes(&self) -> UnboundedReceiver<WriteAttempt> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(tx);
        }
        rx
    }

    fn notify(&self, record: &ActivityRecord, succeeded: bool) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.retain(|tx| {
                tx.send(WriteAttempt {
                    record: record.clone(),
                    succeeded,
                })
                .is_ok()
            });
        }
    }

    fn upsert_now(&self, record: &ActivityRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(StepTrackerError::Persistence(
                "store unavailable".to_string(),
            ));
        }

        let mut records = self.records.lock().map_err(|_| {
            StepTrackerError::Persistence("Failed to acquire records lock".to_string())
        })?;

        records
            .entry((record.user_id.clone(), record.date))
            .and_modify(|stored| stored.apply(record))
            .or_insert_with(|| StoredActivity::created_from(record));

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl ActivityStore for MemoryActivityStore {
    fn upsert<'a>(&'a self, record: &'a ActivityRecord) -> BoxFuture<'a, Result<()>> {
        async move {
            let result = self.upsert_now(record);
            self.notify(record, result.is_ok());
            result
        }
        .boxed()
    }

    fn load_steps<'a>(
        &'a self,
        user_id: &'a str,
        date: NaiveDate,
    ) -> BoxFuture<'a, Result<Option<u64>>> {
        async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StepTrackerError::Persistence(
                    "store unavailable".to_string(),
                ));
            }
            Ok(self.get(user_id, date).map(|stored| stored.steps))
        }
        .boxed()
    }
}
