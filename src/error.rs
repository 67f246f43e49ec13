//! Error types and handling for the gyre library

use thiserror::Error;

/// Result type alias for gyre operations
pub type Result<T> = std::result::Result<T, GyreError>;

/// Main error type for the gyre library
#[derive(Error, Debug)]
pub enum GyreError {
    /// The ring buffer cannot accept the requested claim without wrapping
    /// over unconsumed events
    #[error("insufficient capacity in ring buffer")]
    InsufficientCapacity,

    /// A sequence barrier was alerted while a consumer was waiting on it
    #[error("sequence barrier alerted")]
    Alert,

    /// A wait deadline elapsed before the target sequence became available
    #[error("operation timed out")]
    Timeout,

    /// A rewindable handler requested that the current batch be replayed
    #[error("batch rewind requested: {message}")]
    Rewind {
        /// Description of the condition that triggered the rewind
        message: String,
    },

    /// Invalid lifecycle transition, such as starting a processor twice
    #[error("invalid state: {message}")]
    InvalidState {
        /// Error message describing the lifecycle violation
        message: String,
    },

    /// Invalid configuration parameter
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Failure raised by a user-supplied event handler
    #[error("event handler error: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// I/O errors, e.g. from spawning processor threads
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GyreError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a new lifecycle state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a new rewind request
    pub fn rewind(message: impl Into<String>) -> Self {
        Self::Rewind {
            message: message.into(),
        }
    }

    /// Wrap an arbitrary handler failure
    pub fn handler(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Handler(error.into())
    }

    /// Check if this error is recoverable by retrying the operation
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InsufficientCapacity | Self::Timeout)
    }

    /// Check if this error is a batch rewind request
    pub fn is_rewind(&self) -> bool {
        matches!(self, Self::Rewind { .. })
    }

    /// Check if this error is a barrier alert
    pub fn is_alert(&self) -> bool {
        matches!(self, Self::Alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = GyreError::config("bad buffer size");
        assert!(matches!(err, GyreError::InvalidConfig { .. }));
        assert!(!err.is_recoverable());

        let err = GyreError::state("already running");
        assert!(matches!(err, GyreError::InvalidState { .. }));
    }

    #[test]
    fn test_error_classification() {
        let full = GyreError::InsufficientCapacity;
        assert!(full.is_recoverable());
        assert!(!full.is_rewind());

        let timeout = GyreError::Timeout;
        assert!(timeout.is_recoverable());

        let rewind = GyreError::rewind("transient downstream failure");
        assert!(rewind.is_rewind());
        assert!(!rewind.is_recoverable());

        let alert = GyreError::Alert;
        assert!(alert.is_alert());
    }

    #[test]
    fn test_handler_error_wrapping() {
        let err = GyreError::handler("database unavailable");
        assert!(matches!(err, GyreError::Handler(_)));
        assert!(err.to_string().contains("database unavailable"));
    }
}
