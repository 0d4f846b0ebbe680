use std::sync::Arc;

use chrono::NaiveDate;
use step_tracker::sensors::ScriptedSensorSource;
use step_tracker::store::{MemoryActivityStore, StoredActivity, WriteAttempt};
use step_tracker::{
    ActivityRates, ActivityRecord, ActivityStore, FixedClock, MotionSample, PermissionStatus,
    PumpResult, SessionState, StepTrackerError, TrackerConfig, TrackingSession,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Duration};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 19).unwrap()
}

fn sample(magnitude: f64, t: i64) -> MotionSample {
    MotionSample::new(0.0, 0.0, magnitude, t)
}

/// `n` clearly separated footfalls starting at `t0`
fn footfalls(n: usize, t0: i64) -> Vec<MotionSample> {
    (0..n).map(|i| sample(1.8, t0 + i as i64 * 500)).collect()
}

fn new_session(
    source: ScriptedSensorSource,
    store: Arc<MemoryActivityStore>,
) -> TrackingSession {
    TrackingSession::new("user-42", Box::new(source), store, &TrackerConfig::default())
        .unwrap()
        .with_clock(Arc::new(FixedClock::new(today())))
}

async fn collect_writes(rx: &mut UnboundedReceiver<WriteAttempt>, n: usize) -> Vec<WriteAttempt> {
    let mut out = Vec::new();
    for _ in 0..n {
        let attempt = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("flush did not arrive")
            .expect("store dropped");
        out.push(attempt);
    }
    out
}

#[tokio::test]
async fn test_debounce_scenario_through_session() {
    let store = Arc::new(MemoryActivityStore::new());
    let recording = vec![
        sample(0.5, 1_000),
        sample(1.6, 1_100),
        sample(1.7, 1_150),
        sample(1.8, 1_500),
    ];
    let mut session = new_session(ScriptedSensorSource::from_recording(recording), store);
    session.start().await.unwrap();

    let mut steps = Vec::new();
    loop {
        match session.pump().await {
            PumpResult::Step(event) => steps.push(event.timestamp_ms),
            PumpResult::NoStep => {}
            PumpResult::Ended => break,
        }
    }

    assert_eq!(steps, vec![1_100, 1_500]);
    assert_eq!(session.steps(), 2);
    // End of the recording tears the subscription down
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_twenty_five_steps_flush_ten_and_twenty() {
    let store = Arc::new(MemoryActivityStore::new());
    let mut writes = store.watch_writes();
    let source = ScriptedSensorSource::new(64);
    let feed = source.feed();
    let mut session = new_session(source, store.clone());
    session.start().await.unwrap();

    for s in footfalls(25, 0) {
        assert!(feed.push(s));
    }
    let events = session.drain_pending();
    assert_eq!(events.len(), 25);
    assert_eq!(session.steps(), 25);
    assert_eq!(session.flushes_dispatched(), 2);
    assert_eq!(session.last_flushed_steps(), Some(20));

    let attempts = collect_writes(&mut writes, 2).await;
    let mut counts: Vec<u64> = attempts.iter().map(|a| a.record.steps).collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![10, 20]);

    // Nothing else was written for the trailing 5 steps
    assert!(timeout(Duration::from_millis(100), writes.recv()).await.is_err());
    assert_eq!(store.get("user-42", today()).unwrap().steps, 20);
    assert_eq!(store.get("user-42", today()).unwrap().calories_burned, 0);
}

#[tokio::test]
async fn test_resume_from_forty() {
    let store = Arc::new(MemoryActivityStore::new());
    store.insert(StoredActivity {
        user_id: "user-42".to_string(),
        date: today(),
        steps: 40,
        calories_burned: 1,
        active_minutes: 0,
        sleep_hours: 6.0,
    });
    let mut writes = store.watch_writes();

    let source = ScriptedSensorSource::new(64);
    let feed = source.feed();
    let mut session = new_session(source, store.clone());
    session.start().await.unwrap();
    assert_eq!(session.steps(), 40);

    for s in footfalls(10, 0) {
        feed.push(s);
    }
    session.drain_pending();
    assert_eq!(session.steps(), 50);

    let attempts = collect_writes(&mut writes, 1).await;
    assert_eq!(attempts[0].record.steps, 50);
    assert_eq!(attempts[0].record.calories_burned, 2);

    let stored = store.get("user-42", today()).unwrap();
    assert_eq!(stored.steps, 50);
    assert_eq!(stored.sleep_hours, 6.0);
}

#[tokio::test]
async fn test_permission_denied_leaves_idle_with_error() {
    let store = Arc::new(MemoryActivityStore::new());
    let source = ScriptedSensorSource::new(8).with_permission(PermissionStatus::Denied);
    let mut session = new_session(source, store);

    let result = session.start().await;
    assert!(matches!(result, Err(StepTrackerError::PermissionDenied(_))));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.last_error().is_some());
    assert!(!session.is_tracking());

    let snapshot = session.snapshot();
    assert!(!snapshot.is_tracking);
    assert!(snapshot.last_error.is_some());
}

#[tokio::test]
async fn test_counting_survives_failing_store() {
    let store = Arc::new(MemoryActivityStore::new());
    store.set_failing(true);
    let mut writes = store.watch_writes();

    let source = ScriptedSensorSource::new(64);
    let feed = source.feed();
    let mut session = new_session(source, store.clone());

    // Baseline load fails too; tracking still starts from zero
    session.start().await.unwrap();
    assert_eq!(session.steps(), 0);

    for s in footfalls(20, 0) {
        feed.push(s);
    }
    session.drain_pending();
    assert_eq!(session.steps(), 20);
    assert!(session.is_tracking());
    assert!(session.last_error().is_none());

    let failed = collect_writes(&mut writes, 2).await;
    assert!(failed.iter().all(|a| !a.succeeded));

    // Backend recovers: the next crossing persists the larger count
    store.set_failing(false);
    for s in footfalls(10, 100_000) {
        feed.push(s);
    }
    session.drain_pending();

    let healed = collect_writes(&mut writes, 1).await;
    assert!(healed[0].succeeded);
    assert_eq!(store.get("user-42", today()).unwrap().steps, 30);
}

#[tokio::test]
async fn test_restart_after_stop_reloads_baseline() {
    let store = Arc::new(MemoryActivityStore::new());
    let mut writes = store.watch_writes();
    let source = ScriptedSensorSource::new(64);
    let feed = source.feed();
    let mut session = new_session(source, store.clone());

    session.start().await.unwrap();
    for s in footfalls(13, 0) {
        feed.push(s);
    }
    session.drain_pending();
    collect_writes(&mut writes, 1).await;
    session.stop();
    assert_eq!(session.steps(), 13);

    session.start().await.unwrap();
    assert_eq!(session.steps(), 10);
    assert!(session.is_tracking());
}

#[tokio::test]
async fn test_repeated_upsert_converges() {
    let store = MemoryActivityStore::new();
    let record = ActivityRecord::from_steps("user-42", today(), 120, &ActivityRates::default());

    store.upsert(&record).await.unwrap();
    let once = store.get("user-42", today()).unwrap();
    for _ in 0..10 {
        store.upsert(&record).await.unwrap();
    }

    assert_eq!(store.get("user-42", today()).unwrap(), once);
}

#[tokio::test]
async fn test_sessions_do_not_share_state() {
    let store = Arc::new(MemoryActivityStore::new());
    let a_source = ScriptedSensorSource::new(16);
    let a_feed = a_source.feed();
    let mut a = new_session(a_source, store.clone());
    let mut b = new_session(ScriptedSensorSource::new(16), store);

    a.start().await.unwrap();
    b.start().await.unwrap();
    for s in footfalls(3, 0) {
        a_feed.push(s);
    }
    a.drain_pending();
    b.drain_pending();

    assert_eq!(a.steps(), 3);
    assert_eq!(b.steps(), 0);
}
