use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::Parser;
use serde_json::json;
use step_tracker::recording::load_log;
use step_tracker::sensors::ScriptedSensorSource;
use step_tracker::store::{MemoryActivityStore, StoredActivity};
use step_tracker::{FixedClock, PumpResult, TrackerConfig, TrackingSession};
use tokio::time::{timeout, Duration};

#[derive(Parser, Debug)]
#[command(about = "Replay a recorded accelerometer log through the step detector")]
struct Args {
    /// Path to a sample log (.json or .json.gz)
    #[arg(long)]
    log: PathBuf,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    threshold: Option<f64>,

    #[arg(long)]
    debounce_ms: Option<i64>,

    #[arg(long)]
    batch_size: Option<u64>,

    /// Steps already persisted for the day before the replay starts
    #[arg(long, default_value_t = 0)]
    baseline: u64,

    /// Calendar date to key the record by (default: today, UTC)
    #[arg(long)]
    date: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(threshold) = args.threshold {
        config.detector.magnitude_threshold = threshold;
    }
    if let Some(debounce_ms) = args.debounce_ms {
        config.detector.debounce_ms = debounce_ms;
    }
    if let Some(batch_size) = args.batch_size {
        config.flush.batch_size = batch_size;
    }
    config.validate()?;

    let samples = load_log(&args.log)?;
    let sample_count = samples.len();
    let date = args.date.unwrap_or_else(|| Utc::now().date_naive());

    let store = Arc::new(MemoryActivityStore::new());
    if args.baseline > 0 {
        let derived = config.rates.derive(args.baseline);
        store.insert(StoredActivity {
            user_id: "replay".to_string(),
            date,
            steps: args.baseline,
            calories_burned: derived.calories_burned,
            active_minutes: derived.active_minutes,
            sleep_hours: 0.0,
        });
    }
    let mut writes = store.watch_writes();

    let source = ScriptedSensorSource::from_recording(samples);
    let mut session = TrackingSession::new("replay", Box::new(source), store.clone(), &config)?
        .with_clock(Arc::new(FixedClock::new(date)));
    session.start().await?;

    let mut accepted = Vec::new();
    loop {
        match session.pump().await {
            PumpResult::Step(event) => accepted.push(event),
            PumpResult::NoStep => {}
            PumpResult::Ended => break,
        }
    }

    // Flushes are detached; collect them before reporting
    let mut flushed = Vec::new();
    for _ in 0..session.flushes_dispatched() {
        match timeout(Duration::from_secs(5), writes.recv()).await {
            Ok(Some(attempt)) => flushed.push(attempt.record.steps),
            _ => break,
        }
    }

    let snapshot = session.snapshot();
    let intervals: Vec<i64> = accepted
        .windows(2)
        .map(|w| w[1].timestamp_ms - w[0].timestamp_ms)
        .collect();
    let mean_interval_ms = if intervals.is_empty() {
        None
    } else {
        Some(intervals.iter().sum::<i64>() as f64 / intervals.len() as f64)
    };

    let summary = json!({
        "log": args.log.display().to_string(),
        "samples": sample_count,
        "date": date,
        "baseline": args.baseline,
        "steps": snapshot.steps,
        "steps_detected": accepted.len(),
        "mean_step_interval_ms": mean_interval_ms,
        "flushed_counts": flushed,
        "stored_steps": store.get("replay", date).map(|s| s.steps),
        "metrics": snapshot.metrics,
        "progress": snapshot.progress,
        "detector": config.detector,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
