//! Error types for the SFU client
//!
//! Errors are split the way callers need to react to them: channel and
//! environment failures end the session, negotiation and acquisition
//! failures end only the attempt that raised them.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for all SFU client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the SFU client
#[derive(Error, Debug)]
pub enum Error {
    /// Signaling channel unavailable or closed
    #[error("Signaling channel error: {0}")]
    Channel(String),

    /// The remote reply carried an explicit error field
    #[error("Remote negotiation error: {0}")]
    RemoteNegotiation(String),

    /// The local media stack cannot handle the remote capability set
    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// Device load attempted a second time
    #[error("Device already initialized")]
    AlreadyInitialized,

    /// The platform refused access to the capture device
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No capture device matched the constraints
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The remote had no producer compatible with our capabilities
    #[error("Consume rejected: {0}")]
    ConsumeRejected(String),

    /// Operation issued from a state that does not allow it
    #[error("Invalid state for {operation}: {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the component was in
        state: String,
    },

    /// Transport whose DTLS confirmation failed
    #[error("Transport failed: {0}")]
    TransportFailed(String),

    /// A hook completion was dropped without being signaled
    #[error("{0} hook was dropped without completing")]
    HookAbandoned(&'static str),

    /// Request outlived the configured timeout
    #[error("Request {method} timed out after {after:?}")]
    Timeout {
        /// Signaling method name
        method: String,
        /// Configured timeout
        after: Duration,
    },

    /// Payload did not match the expected shape
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Media engine failure
    #[error("Media engine error: {0}")]
    Engine(String),

    /// Object used after close
    #[error("Closed: {0}")]
    Closed(String),
}

impl Error {
    /// Create a channel error
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel(message.into())
    }

    /// Create a remote negotiation error
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteNegotiation(message.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(operation: &'static str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation,
            state: state.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a media engine error
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    /// Create a closed error
    pub fn closed(what: impl Into<String>) -> Self {
        Self::Closed(what.into())
    }

    /// Check if a retry by the caller can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied(_)
                | Error::DeviceUnavailable(_)
                | Error::ConsumeRejected(_)
                | Error::RemoteNegotiation(_)
                | Error::Timeout { .. }
        )
    }

    /// Check if this error ends the whole session
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Channel(_) | Error::UnsupportedEnvironment(_))
    }

    /// Check if this error came from local media acquisition
    pub fn is_media_access_error(&self) -> bool {
        matches!(self, Error::PermissionDenied(_) | Error::DeviceUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::channel("gone").is_fatal());
        assert!(Error::UnsupportedEnvironment("no vp8".into()).is_fatal());
        assert!(!Error::channel("gone").is_recoverable());

        assert!(Error::PermissionDenied("user said no".into()).is_recoverable());
        assert!(Error::PermissionDenied("user said no".into()).is_media_access_error());
        assert!(Error::ConsumeRejected("no producer".into()).is_recoverable());
        assert!(!Error::AlreadyInitialized.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::invalid_state("produce", "Idle");
        assert_eq!(err.to_string(), "Invalid state for produce: Idle");

        let err = Error::remote("x");
        assert_eq!(err.to_string(), "Remote negotiation error: x");
    }
}
