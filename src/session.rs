use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::detector::{StepDetector, StepEvent};
use crate::error::{Result, StepTrackerError};
use crate::flush::FlushPolicy;
use crate::metrics::{ActivityRates, DailyGoals, DerivedMetrics, GoalProgress};
use crate::sensors::{MotionSample, PermissionStatus, SensorSource, Subscription};
use crate::store::{ActivityRecord, ActivityStore};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Not subscribed to the sensor
    Idle,
    /// Capability check and permission prompt in progress
    RequestingPermission,
    /// Counting steps from the live sample stream
    Tracking,
}

/// Result of pulling one sample off the subscription
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpResult {
    Step(StepEvent),
    NoStep,
    /// Not tracking, or the sensor stream ended (the session is then stopped)
    Ended,
}

/// Caller-facing view of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub user_id: String,
    pub source: String,
    pub date: NaiveDate,
    pub state: SessionState,
    pub steps: u64,
    pub is_tracking: bool,
    pub has_permission: bool,
    pub last_error: Option<String>,
    pub last_step_ms: Option<i64>,
    pub flushes_dispatched: u64,
    pub last_flushed_steps: Option<u64>,
    pub metrics: DerivedMetrics,
    pub progress: GoalProgress,
}

impl SessionSnapshot {
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// One user's step tracking session.
///
/// All state is owned here and mutated only through `&mut self`: the
/// start/stop calls and the per-sample path. Flushes are queued to a
/// detached writer task and report back only through the log.
pub struct TrackingSession {
    user_id: String,
    source: Box<dyn SensorSource>,
    store: Arc<dyn ActivityStore>,
    clock: Arc<dyn Clock>,
    detector: StepDetector,
    policy: FlushPolicy,
    rates: ActivityRates,
    goals: DailyGoals,
    state: SessionState,
    has_permission: bool,
    last_error: Option<StepTrackerError>,
    subscription: Option<Subscription>,
    date: NaiveDate,
    /// Highest count known to be handed to the store for `date`
    persisted_steps: u64,
    flushes_dispatched: u64,
    last_flushed_steps: Option<u64>,
    /// Queue into the writer task, started on the first flush
    flush_tx: Option<UnboundedSender<ActivityRecord>>,
}

impl TrackingSession {
    pub fn new(
        user_id: &str,
        source: Box<dyn SensorSource>,
        store: Arc<dyn ActivityStore>,
        config: &TrackerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        Ok(TrackingSession {
            user_id: user_id.to_string(),
            source,
            store,
            date: clock.today(),
            clock,
            detector: StepDetector::new(config.detector),
            policy: config.flush_policy()?,
            rates: config.rates,
            goals: config.goals,
            state: SessionState::Idle,
            has_permission: false,
            last_error: None,
            subscription: None,
            persisted_steps: 0,
            flushes_dispatched: 0,
            last_flushed_steps: None,
            flush_tx: None,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.date = clock.today();
        self.clock = clock;
        self
    }

    /// Idle → RequestingPermission → Tracking.
    ///
    /// A no-op while already tracking. On a capability or permission failure
    /// the session returns to Idle and the error is kept in `last_error`.
    pub async fn start(&mut self) -> Result<()> {
        if self.state == SessionState::Tracking {
            return Ok(());
        }

        self.state = SessionState::RequestingPermission;
        log::info!(
            "[session] {} requesting {} sensor access",
            self.user_id,
            self.source.name()
        );

        match self.begin_tracking().await {
            Ok(()) => {
                self.last_error = None;
                self.state = SessionState::Tracking;
                log::info!(
                    "[session] {} tracking from baseline {} on {}",
                    self.user_id,
                    self.detector.total_steps(),
                    self.date
                );
                Ok(())
            }
            Err(e) => {
                log::error!("[session] {} failed to start: {}", self.user_id, e);
                self.subscription = None;
                self.state = SessionState::Idle;
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    async fn begin_tracking(&mut self) -> Result<()> {
        if !self.source.is_available() {
            return Err(StepTrackerError::CapabilityUnavailable(format!(
                "{} motion sensor not present on this device",
                self.source.name()
            )));
        }

        match self.source.request_permission().await {
            PermissionStatus::Granted => self.has_permission = true,
            PermissionStatus::Denied => {
                self.has_permission = false;
                return Err(StepTrackerError::PermissionDenied(format!(
                    "{} motion sensor access declined",
                    self.source.name()
                )));
            }
        }

        let today = self.clock.today();
        let baseline = match self.store.load_steps(&self.user_id, today).await {
            Ok(steps) => steps.unwrap_or(0),
            Err(e) => {
                log::warn!(
                    "[session] could not load steps for {} on {}, starting from 0: {}",
                    self.user_id,
                    today,
                    e
                );
                0
            }
        };

        let subscription = self.source.subscribe()?;

        self.date = today;
        self.detector.reset_to(baseline);
        self.persisted_steps = baseline;
        self.last_flushed_steps = None;
        self.subscription = Some(subscription);
        Ok(())
    }

    /// Tracking → Idle. Unsubscribes before returning; a no-op while idle.
    /// In-flight flushes are left to finish on their own.
    pub fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        if self.state != SessionState::Idle {
            log::info!(
                "[session] {} stopped at {} steps",
                self.user_id,
                self.detector.total_steps()
            );
        }
        self.state = SessionState::Idle;
    }

    /// Run one sample through the detector and flush policy.
    /// Ignored unless tracking.
    pub fn handle_sample(&mut self, sample: &MotionSample) -> Option<StepEvent> {
        if self.state != SessionState::Tracking {
            return None;
        }

        let today = self.clock.today();
        if today != self.date {
            self.roll_over(today);
        }

        let event = self.detector.process_sample(sample)?;
        log::debug!(
            "[session] step {} at {} (|a|={:.3})",
            event.step_number,
            event.timestamp_ms,
            event.magnitude
        );

        if let Some(count) = self.policy.crossed(event.step_number - 1, event.step_number) {
            self.dispatch_flush(self.date, count);
        }

        Some(event)
    }

    /// Wait for the next sample and process it
    pub async fn pump(&mut self) -> PumpResult {
        if self.state != SessionState::Tracking {
            return PumpResult::Ended;
        }

        let next = match self.subscription.as_mut() {
            Some(subscription) => subscription.recv().await,
            None => None,
        };

        match next {
            Some(sample) => match self.handle_sample(&sample) {
                Some(event) => PumpResult::Step(event),
                None => PumpResult::NoStep,
            },
            None => {
                log::info!("[session] {} sensor stream ended", self.source.name());
                self.stop();
                PumpResult::Ended
            }
        }
    }

    /// Process every sample already queued without waiting
    pub fn drain_pending(&mut self) -> Vec<StepEvent> {
        let mut events = Vec::new();
        while self.state == SessionState::Tracking {
            let Some(sample) = self.subscription.as_mut().and_then(|s| s.try_recv()) else {
                break;
            };
            if let Some(event) = self.handle_sample(&sample) {
                events.push(event);
            }
        }
        events
    }

    /// New calendar day: hand off the old day's count, then count from zero
    fn roll_over(&mut self, today: NaiveDate) {
        let previous_date = self.date;
        let steps = self.detector.total_steps();
        if steps > self.persisted_steps {
            self.dispatch_flush(previous_date, steps);
        }

        log::info!(
            "[session] day changed {} -> {}, resetting from {} steps",
            previous_date,
            today,
            steps
        );
        self.date = today;
        self.detector.reset_to(0);
        self.persisted_steps = 0;
        self.last_flushed_steps = None;
    }

    /// Queue an upsert without waiting for it.
    ///
    /// Records go through a single writer task in dispatch order, so a slow
    /// write of an older count can never land after a newer one. The writer
    /// outlives `stop()` and drains its queue once the session is dropped.
    fn dispatch_flush(&mut self, date: NaiveDate, steps: u64) {
        self.flushes_dispatched += 1;
        self.last_flushed_steps = Some(steps);
        self.persisted_steps = self.persisted_steps.max(steps);

        let record = ActivityRecord::from_steps(&self.user_id, date, steps, &self.rates);
        log::debug!("[flush] dispatching {} steps for {}", steps, date);

        let Some(tx) = self.flush_sender() else {
            log::warn!("[flush] no async runtime, {} steps for {} not persisted", steps, date);
            return;
        };
        if tx.send(record).is_err() {
            log::warn!("[flush] writer gone, {} steps for {} not persisted", steps, date);
            self.flush_tx = None;
        }
    }

    fn flush_sender(&mut self) -> Option<&UnboundedSender<ActivityRecord>> {
        if self.flush_tx.as_ref().map_or(true, |tx| tx.is_closed()) {
            let runtime = tokio::runtime::Handle::try_current().ok()?;
            let (tx, rx) = mpsc::unbounded_channel();
            runtime.spawn(flush_writer(Arc::clone(&self.store), rx));
            self.flush_tx = Some(tx);
        }
        self.flush_tx.as_ref()
    }

    pub fn steps(&self) -> u64 {
        self.detector.total_steps()
    }

    pub fn is_tracking(&self) -> bool {
        self.state == SessionState::Tracking
    }

    pub fn has_permission(&self) -> bool {
        self.has_permission
    }

    pub fn last_error(&self) -> Option<&StepTrackerError> {
        self.last_error.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tracked_date(&self) -> NaiveDate {
        self.date
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn flushes_dispatched(&self) -> u64 {
        self.flushes_dispatched
    }

    pub fn last_flushed_steps(&self) -> Option<u64> {
        self.last_flushed_steps
    }

    pub fn metrics_stale(&self) -> bool {
        self.detector.metrics_stale()
    }

    /// Recompute calories and active minutes from the current count
    pub fn derived_metrics(&mut self) -> DerivedMetrics {
        self.detector.take_stale();
        self.rates.derive(self.detector.total_steps())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let metrics = self.rates.derive(self.detector.total_steps());
        SessionSnapshot {
            user_id: self.user_id.clone(),
            source: self.source.name().to_string(),
            date: self.date,
            state: self.state,
            steps: self.detector.total_steps(),
            is_tracking: self.is_tracking(),
            has_permission: self.has_permission,
            last_error: self.last_error.as_ref().map(|e| e.to_string()),
            last_step_ms: self.detector.last_step_ms(),
            flushes_dispatched: self.flushes_dispatched,
            last_flushed_steps: self.last_flushed_steps,
            progress: self.goals.progress(&metrics),
            metrics,
        }
    }
}

async fn flush_writer(
    store: Arc<dyn ActivityStore>,
    mut rx: mpsc::UnboundedReceiver<ActivityRecord>,
) {
    while let Some(record) = rx.recv().await {
        match store.upsert(&record).await {
            Ok(()) => log::debug!("[flush] stored {} steps for {}", record.steps, record.date),
            Err(e) => log::warn!(
                "[flush] failed to store {} steps for {}: {}",
                record.steps,
                record.date,
                e
            ),
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.stop();
    }
}
