//! Error types for the tracker.

use thiserror::Error;

/// Result type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Errors surfaced by the recorder client and the live session.
///
/// Precondition violations (stepping while not paused, resuming with nothing
/// pending) are not errors; those calls are no-ops.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Network failure, timeout, or an HTTP status without a usable body
    #[error("Transport error: {0}")]
    Transport(String),

    /// The recorder answered with `success: false`
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed response body
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Polling requires a running Tokio runtime
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl TrackerError {
    /// Whether retrying on the next poll tick can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TrackerError::Transport(_))
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        TrackerError::Transport(e.to_string())
    }
}
