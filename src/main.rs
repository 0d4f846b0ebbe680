use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, sleep, Duration};

use step_tracker::sensors::{SimulatedSensorSource, TermuxSensorSource};
use step_tracker::store::{JsonFileActivityStore, MemoryActivityStore, RestActivityStore};
use step_tracker::{ActivityStore, PumpResult, SensorSource, TrackerConfig, TrackingSession};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    Simulated,
    Termux,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Memory,
    File,
    Rest,
}

#[derive(Parser, Debug)]
#[command(name = "step_tracker")]
#[command(about = "Count steps from the accelerometer and sync them to the daily activity record", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// User the daily record belongs to
    #[arg(long, default_value = "local")]
    user: String,

    /// Motion sensor to read
    #[arg(long, value_enum, default_value = "simulated")]
    source: SourceKind,

    /// Where step counts are persisted
    #[arg(long, value_enum, default_value = "file")]
    store: StoreKind,

    /// JSON file for the file store
    #[arg(long, default_value = "step_tracker_data/activities.json")]
    store_path: PathBuf,

    /// PostgREST base URL for the rest store
    #[arg(long, env = "STEP_TRACKER_REST_URL")]
    rest_url: Option<String>,

    /// API key for the rest store
    #[arg(long, env = "STEP_TRACKER_REST_KEY", hide_env_values = true)]
    rest_key: Option<String>,

    /// Signed-in user's access token for the rest store (defaults to the API key)
    #[arg(long, env = "STEP_TRACKER_REST_TOKEN", hide_env_values = true)]
    rest_token: Option<String>,

    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Acceleration magnitude threshold
    #[arg(long)]
    threshold: Option<f64>,

    /// Minimum milliseconds between steps
    #[arg(long)]
    debounce_ms: Option<i64>,

    /// Persist every N steps
    #[arg(long)]
    batch_size: Option<u64>,

    /// Where the final status snapshot is written
    #[arg(long, default_value = "step_tracker_data/status.json")]
    status_path: PathBuf,
}

enum LoopEvent {
    Sample,
    Status,
    Stop(&'static str),
}

fn load_config(args: &Args) -> Result<TrackerConfig> {
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
    Ok(config)
}

fn build_store(args: &Args) -> Result<Arc<dyn ActivityStore>> {
    let store: Arc<dyn ActivityStore> = match args.store {
        StoreKind::Memory => Arc::new(MemoryActivityStore::new()),
        StoreKind::File => Arc::new(JsonFileActivityStore::new(args.store_path.clone())),
        StoreKind::Rest => {
            let (Some(url), Some(key)) = (&args.rest_url, &args.rest_key) else {
                bail!("--store rest needs --rest-url and --rest-key");
            };
            let mut rest = RestActivityStore::new(url, key);
            if let Some(token) = &args.rest_token {
                rest = rest.with_access_token(token);
            }
            Arc::new(rest)
        }
    };
    Ok(store)
}

fn build_source(kind: SourceKind, config: &TrackerConfig) -> Box<dyn SensorSource> {
    let sensor = &config.sensor;
    match kind {
        SourceKind::Simulated => Box::new(SimulatedSensorSource::new(
            sensor.sample_rate_hz,
            sensor.simulated_cadence_hz,
            sensor.channel_capacity,
        )),
        SourceKind::Termux => Box::new(TermuxSensorSource::new(
            sensor.sample_rate_hz,
            sensor.channel_capacity,
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = load_config(&args)?;
    log::info!("Step tracker starting");
    log::info!("  User: {}", args.user);
    log::info!("  Source: {:?}, store: {:?}", args.source, args.store);
    log::info!(
        "  Threshold: {}, debounce: {} ms, batch: {}",
        config.detector.magnitude_threshold,
        config.detector.debounce_ms,
        config.flush.batch_size
    );

    let store = build_store(&args)?;
    let source = build_source(args.source, &config);
    let mut session = TrackingSession::new(&args.user, source, store, &config)?;

    session
        .start()
        .await
        .context("could not start step tracking")?;

    let deadline = if args.duration > 0 {
        Some(Duration::from_secs(args.duration))
    } else {
        None
    };
    let duration_elapsed = async move {
        match deadline {
            Some(d) => sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(duration_elapsed);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut status_tick = interval(Duration::from_secs(10));
    let started = Utc::now();

    loop {
        let event = tokio::select! {
            result = session.pump() => {
                if result == PumpResult::Ended {
                    LoopEvent::Stop("Sensor stream ended")
                } else {
                    LoopEvent::Sample
                }
            }
            _ = &mut duration_elapsed => LoopEvent::Stop("Duration reached"),
            _ = &mut ctrl_c => LoopEvent::Stop("Interrupted"),
            _ = status_tick.tick() => LoopEvent::Status,
        };

        match event {
            LoopEvent::Sample => {}
            LoopEvent::Status => {
                let metrics = session.derived_metrics();
                log::info!(
                    "{} steps, {} kcal, {} active min ({} flushes)",
                    metrics.steps,
                    metrics.calories_burned,
                    metrics.active_minutes,
                    session.flushes_dispatched()
                );
            }
            LoopEvent::Stop(reason) => {
                log::info!("{}, stopping...", reason);
                break;
            }
        }
    }

    session.stop();

    // Give detached flushes a moment to land before the runtime shuts down
    sleep(Duration::from_millis(250)).await;

    let snapshot = session.snapshot();
    if let Some(parent) = args.status_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    snapshot.save(&args.status_path)?;

    let uptime = Utc::now().signed_duration_since(started).num_seconds().max(0);
    println!("\n=== Final Stats ===");
    println!("Date: {}", snapshot.date);
    println!("Steps: {}", snapshot.steps);
    println!("Calories: {} kcal", snapshot.metrics.calories_burned);
    println!("Active minutes: {}", snapshot.metrics.active_minutes);
    println!("Step goal: {:.1}%", snapshot.progress.steps_pct);
    println!("Flushes: {}", snapshot.flushes_dispatched);
    println!("Uptime: {} s", uptime);
    println!("Status written to {}", args.status_path.display());

    Ok(())
}
