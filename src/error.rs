use thiserror::Error;

/// Step tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepTrackerError {
    /// Host exposes no motion sensing interface
    #[error("Motion sensing unavailable: {0}")]
    CapabilityUnavailable(String),

    /// User or platform declined sensor access
    #[error("Motion sensor permission denied: {0}")]
    PermissionDenied(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl StepTrackerError {
    /// Sensor-layer errors end the current session; everything else is recovered locally.
    pub fn is_terminal_for_session(&self) -> bool {
        matches!(
            self,
            StepTrackerError::CapabilityUnavailable(_) | StepTrackerError::PermissionDenied(_)
        )
    }
}

impl From<std::io::Error> for StepTrackerError {
    fn from(e: std::io::Error) -> Self {
        StepTrackerError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StepTrackerError {
    fn from(e: serde_json::Error) -> Self {
        StepTrackerError::Persistence(format!("JSON: {}", e))
    }
}

impl From<reqwest::Error> for StepTrackerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return StepTrackerError::Persistence("request timed out".to_string());
        }
        StepTrackerError::Persistence(e.to_string())
    }
}

/// Result type for step tracker operations
pub type Result<T> = std::result::Result<T, StepTrackerError>;
