//! Centralized error types for Pulse.

use thiserror::Error;

/// Main error type for Pulse core operations.
#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for Pulse core operations.
pub type PulseResult<T> = Result<T, PulseError>;

impl PulseError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid topic error.
    pub fn invalid_topic(topic: impl Into<String>) -> Self {
        Self::InvalidTopic(topic.into())
    }
}
