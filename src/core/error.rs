use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Command '{op}' failed: {message}")]
    Command { op: &'static str, message: String },

    #[error("Command '{op}' timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("Scan aborted: {0}")]
    Scan(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

impl StoreError {
    pub fn command(op: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            op,
            message: message.into(),
        }
    }

    /// Timeouts are reported separately from other failures so callers can
    /// tell a slow store apart from a broken one.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of one command inside a pipelined batch.
pub type ItemResult<T> = std::result::Result<T, StoreError>;

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            Self::Connection(err.to_string())
        } else if err.is_timeout() {
            Self::Timeout {
                op: "redis",
                after: Duration::ZERO,
            }
        } else {
            Self::Command {
                op: "redis",
                message: err.to_string(),
            }
        }
    }
}
