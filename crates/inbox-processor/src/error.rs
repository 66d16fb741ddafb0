//! Error types for inbox processing.
//!
//! Handler failures are deliberately absent here: they are domain outcomes
//! that drive the retry state machine, not processing errors. These
//! variants cover the faults the processor itself can hit.

use thiserror::Error;

/// Result type alias for processor operations.
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Errors raised by the processor and topic registry.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// No handler registered for a topic.
    ///
    /// Raised when an event is dispatched for a topic the registry does not
    /// know; surfaced to the dispatching caller rather than silently
    /// dropping the event.
    #[error("no handler registered for topic {topic}")]
    NoHandler {
        /// Topic that had no registered handler
        topic: String,
    },

    /// Storage operation failed during claiming or a status transition.
    #[error("storage error: {message}")]
    Storage {
        /// Underlying storage error message
        message: String,
    },

    /// Invalid processor or topic configuration, detected at construction.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What was wrong with the configuration
        message: String,
    },
}

impl ProcessError {
    /// Creates a no-handler error for a topic.
    pub fn no_handler(topic: impl Into<String>) -> Self {
        Self::NoHandler { topic: topic.into() }
    }

    /// Creates a storage error from a message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a configuration error from a message.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_format() {
        let err = ProcessError::no_handler("orders");
        assert_eq!(err.to_string(), "no handler registered for topic orders");

        let err = ProcessError::storage("connection lost");
        assert_eq!(err.to_string(), "storage error: connection lost");
    }
}
