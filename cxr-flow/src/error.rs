use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No usable report for {image_id}: {reason}")]
    ReportUnavailable { image_id: String, reason: String },

    #[error("Error generating final report: {0}")]
    Finalization(String),

    #[error("Record source error: {0}")]
    RecordSource(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl FlowError {
    /// Errors from a delegated agent or the record source. The same call
    /// can succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowError::ReportUnavailable { .. }
                | FlowError::Finalization(_)
                | FlowError::RecordSource(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let unavailable = FlowError::ReportUnavailable {
            image_id: "img_1_0".to_string(),
            reason: "anchor 503".to_string(),
        };
        assert!(unavailable.is_retryable());
        assert!(FlowError::Finalization("timeout".to_string()).is_retryable());
        assert!(FlowError::RecordSource("missing".to_string()).is_retryable());

        assert!(!FlowError::InvalidState("not started".to_string()).is_retryable());
        assert!(!FlowError::SessionNotFound("img_1_0".to_string()).is_retryable());
        assert!(!FlowError::StorageError("poisoned".to_string()).is_retryable());
    }
}
