use crate::error::{Result, StepTrackerError};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

/// Standard gravity, used to normalise m/s² readings to g
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Single 3-axis accelerometer reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
}

impl MotionSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp_ms: i64) -> Self {
        Self { x, y, z, timestamp_ms }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Live subscription to a sensor's sample stream.
///
/// Dropping or unsubscribing closes the channel and aborts the producer task,
/// so nothing is delivered afterwards.
pub struct Subscription {
    receiver: Receiver<MotionSample>,
    producer: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(receiver: Receiver<MotionSample>, producer: Option<JoinHandle<()>>) -> Self {
        Self { receiver, producer }
    }

    /// Wait for the next sample; `None` once the producer has finished
    pub async fn recv(&mut self) -> Option<MotionSample> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MotionSample> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.receiver.close();
        if let Some(handle) = self.producer.take() {
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Platform motion sensor as seen by a tracking session
pub trait SensorSource: Send {
    fn name(&self) -> &str;

    /// Whether the host exposes motion sensing at all
    fn is_available(&self) -> bool;

    fn request_permission(&mut self) -> BoxFuture<'_, PermissionStatus>;

    /// Start delivering samples. Must be called from within a tokio runtime.
    fn subscribe(&mut self) -> Result<Subscription>;
}

/// Sensor fed by the caller, either live through a [`SampleFeed`] or from a
/// preloaded recording.
pub struct ScriptedSensorSource {
    available: bool,
    permission: PermissionStatus,
    capacity: usize,
    recording: Option<Vec<MotionSample>>,
    feed: Arc<Mutex<Option<Sender<MotionSample>>>>,
}

/// Handle for pushing samples into a [`ScriptedSensorSource`]'s current subscription
#[derive(Clone)]
pub struct SampleFeed {
    slot: Arc<Mutex<Option<Sender<MotionSample>>>>,
}

impl SampleFeed {
    /// Returns false when nobody is subscribed or the channel is full
    pub fn push(&self, sample: MotionSample) -> bool {
        let sender = match self.slot.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => return false,
        };
        match sender {
            Some(tx) => tx.try_send(sample).is_ok(),
            None => false,
        }
    }
}

impl ScriptedSensorSource {
    pub fn new(capacity: usize) -> Self {
        Self {
            available: true,
            permission: PermissionStatus::Granted,
            capacity: capacity.max(1),
            recording: None,
            feed: Arc::new(Mutex::new(None)),
        }
    }

    /// Replays `samples` once per subscription, then ends the stream
    pub fn from_recording(samples: Vec<MotionSample>) -> Self {
        let mut source = Self::new(256);
        source.recording = Some(samples);
        source
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn with_permission(mut self, permission: PermissionStatus) -> Self {
        self.permission = permission;
        self
    }

    pub fn feed(&self) -> SampleFeed {
        SampleFeed {
            slot: self.feed.clone(),
        }
    }
}

impl SensorSource for ScriptedSensorSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn request_permission(&mut self) -> BoxFuture<'_, PermissionStatus> {
        futures::future::ready(self.permission).boxed()
    }

    fn subscribe(&mut self) -> Result<Subscription> {
        if !self.available {
            return Err(StepTrackerError::CapabilityUnavailable(
                "scripted sensor disabled".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(self.capacity);

        let Some(recording) = &self.recording else {
            let mut slot = self.feed.lock().map_err(|_| {
                StepTrackerError::InvalidState("Failed to acquire feed lock".to_string())
            })?;
            *slot = Some(tx);
            return Ok(Subscription::new(rx, None));
        };

        let samples = recording.clone();
        let producer = tokio::spawn(async move {
            for sample in samples {
                if tx.send(sample).await.is_err() {
                    break;
                }
            }
        });
        Ok(Subscription::new(rx, Some(producer)))
    }
}

/// Synthetic walking signal: 1 g of gravity plus one footfall pulse per step
pub struct SimulatedSensorSource {
    sample_rate_hz: f64,
    cadence_hz: f64,
    peak_g: f64,
    capacity: usize,
}

impl SimulatedSensorSource {
    pub fn new(sample_rate_hz: f64, cadence_hz: f64, capacity: usize) -> Self {
        Self {
            sample_rate_hz: sample_rate_hz.max(1.0),
            cadence_hz,
            peak_g: 0.6,
            capacity: capacity.max(1),
        }
    }
}

impl SensorSource for SimulatedSensorSource {
    fn name(&self) -> &str {
        "simulated"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn request_permission(&mut self) -> BoxFuture<'_, PermissionStatus> {
        futures::future::ready(PermissionStatus::Granted).boxed()
    }

    fn subscribe(&mut self) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let producer = tokio::spawn(simulated_loop(
            tx,
            self.sample_rate_hz,
            self.cadence_hz,
            self.peak_g,
        ));
        Ok(Subscription::new(rx, Some(producer)))
    }
}

/// Walking signal at time `t` seconds into the session
pub fn synthetic_walking_sample(t: f64, cadence_hz: f64, peak_g: f64, timestamp_ms: i64) -> MotionSample {
    use std::f64::consts::PI;
    let footfall = (2.0 * PI * cadence_hz * t).sin().max(0.0).powi(4);

    MotionSample {
        x: (t * PI * cadence_hz).sin() * 0.05,
        y: (t * PI * cadence_hz).cos() * 0.03,
        z: 1.0 + peak_g * footfall,
        timestamp_ms,
    }
}

async fn simulated_loop(tx: Sender<MotionSample>, rate_hz: f64, cadence_hz: f64, peak_g: f64) {
    let mut interval = interval(Duration::from_secs_f64(1.0 / rate_hz));
    let start_ms = Utc::now().timestamp_millis();
    let mut tick = 0u64;
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;
        let t = tick as f64 / rate_hz;
        tick += 1;

        let sample = synthetic_walking_sample(t, cadence_hz, peak_g, start_ms + (t * 1000.0) as i64);

        match tx.try_send(sample) {
            Ok(_) => {
                sample_count += 1;
                if sample_count % 500 == 0 {
                    log::debug!("[simulated] {} samples", sample_count);
                }
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("[simulated] Channel closed after {} samples", sample_count);
                break;
            }
            Err(TrySendError::Full(_)) => {
                // Channel full, drop this sample
            }
        }
    }
}

/// Accelerometer read through Termux:API's `termux-sensor`
pub struct TermuxSensorSource {
    sample_rate_hz: f64,
    capacity: usize,
}

impl TermuxSensorSource {
    pub fn new(sample_rate_hz: f64, capacity: usize) -> Self {
        Self {
            sample_rate_hz: sample_rate_hz.max(1.0),
            capacity: capacity.max(1),
        }
    }
}

impl SensorSource for TermuxSensorSource {
    fn name(&self) -> &str {
        "termux"
    }

    fn is_available(&self) -> bool {
        std::process::Command::new("termux-sensor")
            .arg("-l")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn request_permission(&mut self) -> BoxFuture<'_, PermissionStatus> {
        async {
            // Termux:API prompts on first use; a parsable reading means access was granted
            match read_accelerometer().await {
                Some(_) => PermissionStatus::Granted,
                None => PermissionStatus::Denied,
            }
        }
        .boxed()
    }

    fn subscribe(&mut self) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let producer = tokio::spawn(termux_loop(tx, self.sample_rate_hz));
        Ok(Subscription::new(rx, Some(producer)))
    }
}

async fn termux_loop(tx: Sender<MotionSample>, rate_hz: f64) {
    let mut interval = interval(Duration::from_secs_f64(1.0 / rate_hz));
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;

        let Some(sample) = read_accelerometer().await else {
            continue;
        };

        match tx.try_send(sample) {
            Ok(_) => {
                sample_count += 1;
                if sample_count % 100 == 0 {
                    log::debug!("[termux] {} samples", sample_count);
                }
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("[termux] Channel closed after {} samples", sample_count);
                break;
            }
            Err(TrySendError::Full(_)) => {}
        }
    }
}

async fn read_accelerometer() -> Option<MotionSample> {
    let output = tokio::process::Command::new("termux-sensor")
        .arg("-n")
        .arg("1")
        .arg("-s")
        .arg("accelerometer")
        .output()
        .await
        .ok()?;

    let text = String::from_utf8_lossy(&output.stdout);
    parse_accel_output(&text, Utc::now().timestamp_millis())
}

/// Parse `Accelerometer event: x=X, y=Y, z=Z, ...` (m/s²) into a sample in g
fn parse_accel_output(output: &str, timestamp_ms: i64) -> Option<MotionSample> {
    let mut x = None;
    let mut y = None;
    let mut z = None;

    for part in output.split(|c| c == ',' || c == ':') {
        let part = part.trim();
        if let Some(val_str) = part.strip_prefix("x=") {
            x = val_str.trim().parse::<f64>().ok();
        } else if let Some(val_str) = part.strip_prefix("y=") {
            y = val_str.trim().parse::<f64>().ok();
        } else if let Some(val_str) = part.strip_prefix("z=") {
            z = val_str.trim().parse::<f64>().ok();
        }
    }

    Some(MotionSample {
        x: x? / STANDARD_GRAVITY,
        y: y? / STANDARD_GRAVITY,
        z: z? / STANDARD_GRAVITY,
        timestamp_ms,
    })
}
