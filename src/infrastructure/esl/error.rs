//! Event-socket errors

use thiserror::Error;

use crate::domain::shared::CoreError;

#[derive(Error, Debug)]
pub enum EslError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed")]
    Disconnected,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<EslError> for CoreError {
    fn from(err: EslError) -> Self {
        match err {
            EslError::Io(e) => CoreError::Connection(e.to_string()),
            EslError::Auth(msg) => CoreError::Connection(format!("auth failed: {}", msg)),
            EslError::NotConnected => CoreError::Connection("not connected".to_string()),
            EslError::Disconnected => CoreError::Connection("connection closed".to_string()),
            EslError::Protocol(msg) => CoreError::Protocol(msg),
            EslError::Command(msg) => CoreError::Protocol(format!("command failed: {}", msg)),
            EslError::Timeout(d) => CoreError::Timeout(format!("no reply within {:?}", d)),
        }
    }
}
