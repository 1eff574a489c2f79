//! Domain errors for the Tripwire ingestion and dispatch core.

use thiserror::Error;
use uuid::Uuid;

/// Why a single inbound payload could not be normalized.
///
/// A normalization error only ever affects the item that produced it; the
/// rest of the batch keeps processing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Payload is not a JSON object (found {0})")]
    NotAnObject(&'static str),

    #[error("Payload has no timestamp field")]
    MissingTimestamp,

    #[error("Unparseable timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Failure while evaluating a single trigger condition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Errors raised by the dispatch queue and its job stores.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// Errors from the real-time connection transport.
///
/// These never escape the connection manager; they drive its reconnect
/// state machine and are reported through signals and logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection timed out after {0}ms")]
    Timeout(u64),

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),
}
