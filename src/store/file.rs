use super::{ActivityRecord, ActivityStore, StoredActivity};
use crate::error::{Result, StepTrackerError};
use chrono::NaiveDate;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ActivityFile {
    records: Vec<StoredActivity>,
}

/// All daily records in one pretty-printed JSON file.
///
/// # File Format
/// `{ "records": [ { "user_id", "date", "steps", "calories_burned",
/// "active_minutes", "sleep_hours" }, ... ] }`
///
/// Writes go to `<path>.tmp` and are renamed over the original, so a crash
/// mid-write leaves the previous state intact. Overlapping flushes are
/// serialised through an async mutex.
pub struct JsonFileActivityStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileActivityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<ActivityFile> {
        // Missing file means no records yet, not an error
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ActivityFile::default()),
            Err(e) => Err(StepTrackerError::Persistence(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn write_file(&self, file: &ActivityFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StepTrackerError::Persistence(format!("Failed to create store dir: {}", e))
                })?;
            }
        }

        let json = serde_json::to_string_pretty(file)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StepTrackerError::Persistence(format!("Failed to write store: {}", e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StepTrackerError::Persistence(format!("Failed to replace store: {}", e)))?;
        Ok(())
    }

    pub async fn get(&self, user_id: &str, date: NaiveDate) -> Result<Option<StoredActivity>> {
        let file = self.read_file().await?;
        Ok(file
            .records
            .into_iter()
            .find(|r| r.user_id == user_id && r.date == date))
    }
}

impl ActivityStore for JsonFileActivityStore {
    fn upsert<'a>(&'a self, record: &'a ActivityRecord) -> BoxFuture<'a, Result<()>> {
        async move {
            let _guard = self.write_lock.lock().await;
            let mut file = self.read_file().await?;

            match file
                .records
                .iter_mut()
                .find(|r| r.user_id == record.user_id && r.date == record.date)
            {
                Some(stored) => stored.apply(record),
                None => file.records.push(StoredActivity::created_from(record)),
            }

            self.write_file(&file).await
        }
        .boxed()
    }

    fn load_steps<'a>(
        &'a self,
        user_id: &'a str,
        date: NaiveDate,
    ) -> BoxFuture<'a, Result<Option<u64>>> {
        async move { Ok(self.get(user_id, date).await?.map(|stored| stored.steps)) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ActivityRates;

    fn temp_store(name: &str) -> JsonFileActivityStore {
        let path = std::env::temp_dir()
            .join(format!("step_tracker_{}_{}", name, std::process::id()))
            .join("activities.json");
        let _ = std::fs::remove_file(&path);
        JsonFileActivityStore::new(path)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let store = temp_store("missing");
        assert_eq!(store.load_steps("u1", day()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_persists_across_instances() {
        let store = temp_store("persist");
        let rates = ActivityRates::default();

        store
            .upsert(&ActivityRecord::from_steps("u1", day(), 40, &rates))
            .await
            .unwrap();
        store
            .upsert(&ActivityRecord::from_steps("u2", day(), 10, &rates))
            .await
            .unwrap();
        store
            .upsert(&ActivityRecord::from_steps("u1", day(), 50, &rates))
            .await
            .unwrap();

        let reopened = JsonFileActivityStore::new(store.path().to_path_buf());
        assert_eq!(reopened.load_steps("u1", day()).await.unwrap(), Some(50));
        assert_eq!(reopened.load_steps("u2", day()).await.unwrap(), Some(10));

        let stored = reopened.get("u1", day()).await.unwrap().unwrap();
        assert_eq!(stored.calories_burned, 2);
        assert_eq!(stored.sleep_hours, 0.0);

        let _ = std::fs::remove_file(store.path());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_persistence_error() {
        let store = temp_store("corrupt");
        if let Some(parent) = store.path().parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(store.path(), "{ nope").unwrap();

        assert!(matches!(
            store.load_steps("u1", day()).await,
            Err(StepTrackerError::Persistence(_))
        ));
        let _ = std::fs::remove_file(store.path());
    }
}
