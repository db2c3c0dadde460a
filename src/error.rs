use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("message generation failed: {reason}")]
    GenerationFailure { reason: String, retryable: bool },
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl MonitorError {
    pub fn generation(reason: impl Into<String>) -> Self {
        Self::GenerationFailure {
            reason: reason.into(),
            retryable: false,
        }
    }

    /// Only transient generation failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GenerationFailure { retryable: true, .. })
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
