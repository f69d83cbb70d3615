use thiserror::Error;

/// Step tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepTrackerError {
    #[error("Health store not ready")]
    NotReady,

    #[error("No tracking session to save")]
    NoSession,

    #[error("Health store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("Sensor failed: {0}")]
    SensorFailed(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl StepTrackerError {
    /// True for failures the caller can clear by retrying the same call
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StepTrackerError::StoreWriteFailed(_) | StepTrackerError::StorageError(_)
        )
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, StepTrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(StepTrackerError::NoSession.to_string(), "No tracking session to save");
        assert_eq!(
            StepTrackerError::StoreWriteFailed("permission revoked".to_string()).to_string(),
            "Health store write failed: permission revoked"
        );
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(StepTrackerError::StoreWriteFailed("x".into()).is_retryable());
        assert!(!StepTrackerError::NotReady.is_retryable());
        assert!(!StepTrackerError::NoSession.is_retryable());
    }
}
