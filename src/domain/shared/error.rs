//! Core errors

use thiserror::Error;

/// Core result type
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    #[error("Invalid dial string: {0}")]
    InvalidDialString(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Race condition: {0}")]
    RaceCondition(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl CoreError {
    /// Whether the failed operation may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Connection(_)
                | CoreError::ExternalService(_)
                | CoreError::RaceCondition(_)
                | CoreError::Timeout(_)
        )
    }
}
