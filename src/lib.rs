// Step tracking core
// Turns raw accelerometer samples into a daily step count and keeps the
// activity store in sync with it

pub mod clock;
pub mod config;
pub mod detector;
pub mod error;
pub mod flush;
pub mod metrics;
pub mod recording;
pub mod sensors;
pub mod session;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::TrackerConfig;
pub use detector::{StepDetector, StepDetectorConfig, StepEvent};
pub use error::{Result, StepTrackerError};
pub use flush::FlushPolicy;
pub use metrics::{ActivityRates, DailyGoals, DerivedMetrics, GoalProgress};
pub use sensors::{MotionSample, PermissionStatus, SensorSource, Subscription};
pub use session::{PumpResult, SessionSnapshot, SessionState, TrackingSession};
pub use store::{ActivityRecord, ActivityStore};
