use super::{ActivityRecord, ActivityStore};
use crate::error::{Result, StepTrackerError};
use chrono::{NaiveDate, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct UpsertRow<'a> {
    user_id: &'a str,
    date: NaiveDate,
    steps: u64,
    calories_burned: u64,
    active_minutes: u64,
    updated_at: String,
}

#[derive(Debug, Deserialize)]
struct StepsRow {
    steps: Option<u64>,
}

/// PostgREST client for the managed backend's `activities` table
///
/// # Requests
/// - Upsert: `POST {base}/rest/v1/activities?on_conflict=user_id,date` with
///   `Prefer: resolution=merge-duplicates`. Only the step-owned columns are
///   sent, so the backend keeps everything else.
/// - Load: `GET {base}/rest/v1/activities?select=steps&user_id=eq.{user}&date=eq.{date}`
///
/// # Authentication
/// `apikey` always carries the project key. The bearer token is the signed-in
/// user's access token when one is set (required under row-level security),
/// otherwise the project key.
///
/// # Error Handling
/// - Transport errors and non-2xx responses map to `StepTrackerError::Persistence`
/// - No retries; the next flush carries the newer count anyway
pub struct RestActivityStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    table: String,
}

impl RestActivityStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("step_tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        RestActivityStore {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
            table: "activities".to_string(),
        }
    }

    /// Authorize requests as a signed-in user
    pub fn with_access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(self.access_token.as_deref().unwrap_or(&self.api_key))
    }

    fn build_upsert_request(&self, record: &ActivityRecord) -> Result<reqwest::Request> {
        let row = UpsertRow {
            user_id: &record.user_id,
            date: record.date,
            steps: record.steps,
            calories_burned: record.calories_burned,
            active_minutes: record.active_minutes,
            updated_at: Utc::now().to_rfc3339(),
        };

        let request = self
            .authorized(self.client.post(self.table_url()))
            .query(&[("on_conflict", "user_id,date")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row])
            .build()?;
        Ok(request)
    }

    fn build_load_request(&self, user_id: &str, date: NaiveDate) -> Result<reqwest::Request> {
        let request = self
            .authorized(self.client.get(self.table_url()))
            .query(&[
                ("select", "steps".to_string()),
                ("user_id", format!("eq.{}", user_id)),
                ("date", format!("eq.{}", date)),
            ])
            .build()?;
        Ok(request)
    }

    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let response = self.client.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StepTrackerError::Persistence(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }
        Ok(response)
    }
}

impl ActivityStore for RestActivityStore {
    fn upsert<'a>(&'a self, record: &'a ActivityRecord) -> BoxFuture<'a, Result<()>> {
        async move {
            let request = self.build_upsert_request(record)?;
            self.execute(request).await?;
            Ok(())
        }
        .boxed()
    }

    fn load_steps<'a>(
        &'a self,
        user_id: &'a str,
        date: NaiveDate,
    ) -> BoxFuture<'a, Result<Option<u64>>> {
        async move {
            let request = self.build_load_request(user_id, date)?;
            let rows: Vec<StepsRow> = self.execute(request).await?.json().await?;
            Ok(rows.into_iter().next().map(|row| row.steps.unwrap_or(0)))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ActivityRates;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    #[test]
    fn test_upsert_request_shape() {
        let store = RestActivityStore::new("https://example.supabase.co/", "anon-key");
        let record = ActivityRecord::from_steps("user-1", day(), 20, &ActivityRates::default());

        let request = store.build_upsert_request(&record).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/rest/v1/activities");
        assert_eq!(request.url().query(), Some("on_conflict=user_id%2Cdate"));

        let headers = request.headers();
        assert_eq!(headers["apikey"], "anon-key");
        assert_eq!(headers["authorization"], "Bearer anon-key");
        assert!(headers["prefer"]
            .to_str()
            .unwrap()
            .contains("resolution=merge-duplicates"));

        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(json[0]["steps"], 20);
        assert_eq!(json[0]["date"], "2025-06-01");
        assert_eq!(json[0]["calories_burned"], 0);
        assert!(json[0].get("sleep_hours").is_none());
    }

    #[test]
    fn test_access_token_used_as_bearer() {
        let store = RestActivityStore::new("https://example.supabase.co", "anon-key")
            .with_access_token("user-jwt");
        let record = ActivityRecord::from_steps("user-1", day(), 10, &ActivityRates::default());

        for request in [
            store.build_upsert_request(&record).unwrap(),
            store.build_load_request("user-1", day()).unwrap(),
        ] {
            assert_eq!(request.headers()["apikey"], "anon-key");
            assert_eq!(request.headers()["authorization"], "Bearer user-jwt");
        }
    }

    #[test]
    fn test_load_request_filters() {
        let store = RestActivityStore::new("https://example.supabase.co", "k");
        let request = store.build_load_request("user-1", day()).unwrap();

        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("select".to_string(), "steps".to_string())));
        assert!(pairs.contains(&("user_id".to_string(), "eq.user-1".to_string())));
        assert!(pairs.contains(&("date".to_string(), "eq.2025-06-01".to_string())));
    }

    // Requires a reachable backend; run with STEP_TRACKER_REST_URL/KEY set
    #[tokio::test]
    #[ignore]
    async fn test_rest_round_trip_integration() {
        let url = std::env::var("STEP_TRACKER_REST_URL").unwrap();
        let key = std::env::var("STEP_TRACKER_REST_KEY").unwrap();
        let store = RestActivityStore::new(&url, &key);

        let record = ActivityRecord::from_steps("integration-user", day(), 30, &ActivityRates::default());
        store.upsert(&record).await.unwrap();
        assert_eq!(
            store.load_steps("integration-user", day()).await.unwrap(),
            Some(30)
        );
    }
}
