/*
[INPUT]:  Error sources (transport, timeouts, configuration, serialization)
[OUTPUT]: Structured error types with retry hints
[POS]:    Error handling layer - unified error type for the realtime crate
[UPDATE]: When adding new error sources or improving error messages
*/

use thiserror::Error;

/// Main error type for the realtime client.
///
/// The type is `Clone` because a single connection outcome is shared by every
/// caller awaiting the same attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    /// The transport did not open within the configured window
    #[error("Connection timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Low-level transport failure (DNS, TCP, TLS, handshake, closed socket)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The attempt was superseded by `disconnect` before it completed
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// No Tokio runtime was available to drive the connection
    #[error("No Tokio runtime available to drive the connection")]
    NoRuntime,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RealtimeError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RealtimeError::Timeout { .. } | RealtimeError::Transport(_)
        )
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        RealtimeError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for RealtimeError {
    fn from(err: url::ParseError) -> Self {
        RealtimeError::Config(format!("invalid url: {err}"))
    }
}

/// Result type alias for realtime operations
pub type Result<T> = std::result::Result<T, RealtimeError>;
