//! Error types for broker sessions.

use std::time::Duration;

use feeder_core::TopicError;
use thiserror::Error;

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected to broker")]
    NotConnected,

    #[error("no acknowledgement from broker within {0:?}")]
    Timeout(Duration),

    #[error("mqtt client error: {0}")]
    Client(String),

    #[error("failed to encode payload: {0}")]
    Encode(serde_json::Error),

    #[error("failed to decode payload: {0}")]
    Decode(serde_json::Error),

    #[error(transparent)]
    Topic(#[from] TopicError),
}
