//! Error types for meetrtc

use std::time::Duration;
use thiserror::Error;

/// Convenience result alias used across the meetrtc crates
pub type Result<T> = std::result::Result<T, MeetRtcError>;

/// Main error type for meetrtc operations
#[derive(Error, Debug)]
pub enum MeetRtcError {
    /// Signaling request exhausted its attempts without an answer
    #[error("Request {method} timed out after {attempts} attempt(s) of {timeout:?}")]
    Timeout {
        /// Request method
        method: String,
        /// Number of wire attempts made
        attempts: u32,
        /// Per-attempt timeout
        timeout: Duration,
    },

    /// Server answered the request with an application error
    #[error("Server rejected {method}: {error}")]
    Server {
        /// Request method
        method: String,
        /// Error payload exactly as returned by the server
        error: serde_json::Value,
    },

    /// No underlying signaling connection
    #[error("No signaling connection")]
    NotConnected,

    /// Transport error
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// The engine or platform cannot produce the requested media
    #[error("Capability error: {reason}")]
    Capability {
        /// What cannot be produced
        reason: String,
    },

    /// Local media acquisition failed (permission denied, busy device, ...)
    #[error("Device acquisition failed: {reason}")]
    DeviceAcquisition {
        /// Reason reported by the platform
        reason: String,
    },

    /// Capture succeeded but returned no track of the wanted kind
    #[error("No {kind} track returned by capture")]
    DeviceNotFound {
        /// Wanted track kind or source
        kind: String,
    },

    /// Producer operations were attempted before the room was joined
    #[error("Client not ready: join a room first")]
    ClientNotReady,

    /// Invalid operation error
    #[error("Invalid operation: {operation}")]
    InvalidOperation {
        /// Operation that was invalid
        operation: String,
    },

    /// Response or notification payload did not match the expected shape
    #[error("Invalid message for {method}: {source}")]
    InvalidMessage {
        /// Method whose payload failed to parse
        method: String,
        /// Parsing error
        source: serde_json::Error,
    },

    /// External media engine failure
    #[error("Media engine error: {reason}")]
    Engine {
        /// Reason reported by the engine
        reason: String,
    },

    /// Missing configuration error
    #[error("Missing required configuration: {field}")]
    MissingConfiguration {
        /// Missing configuration field
        field: String,
    },

    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },
}

impl MeetRtcError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            MeetRtcError::Timeout { .. } => "SOCKET_TIMEOUT",
            MeetRtcError::Server { .. } => "SERVER_ERROR",
            MeetRtcError::NotConnected => "NOT_CONNECTED",
            MeetRtcError::Transport { .. } => "TRANSPORT_ERROR",
            MeetRtcError::Capability { .. } => "CAPABILITY_ERROR",
            MeetRtcError::DeviceAcquisition { .. } => "DEVICE_ACQUISITION_FAILED",
            MeetRtcError::DeviceNotFound { .. } => "DEVICE_NOT_FOUND",
            MeetRtcError::ClientNotReady => "CLIENT_NOT_READY",
            MeetRtcError::InvalidOperation { .. } => "INVALID_OPERATION",
            MeetRtcError::InvalidMessage { .. } => "INVALID_MESSAGE",
            MeetRtcError::Engine { .. } => "ENGINE_ERROR",
            MeetRtcError::MissingConfiguration { .. } => "MISSING_CONFIGURATION",
            MeetRtcError::Initialization { .. } => "INITIALIZATION_FAILED",
        }
    }

    /// Whether this is a signaling timeout, the only retried failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, MeetRtcError::Timeout { .. })
    }

    /// Shorthand for an [`MeetRtcError::InvalidOperation`]
    pub fn invalid_operation(operation: impl Into<String>) -> Self {
        MeetRtcError::InvalidOperation {
            operation: operation.into(),
        }
    }

    /// Shorthand for a [`MeetRtcError::Capability`]
    pub fn capability(reason: impl Into<String>) -> Self {
        MeetRtcError::Capability {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let timeout = MeetRtcError::Timeout {
            method: "join".to_string(),
            attempts: 3,
            timeout: Duration::from_secs(20),
        };
        assert_eq!(timeout.error_code(), "SOCKET_TIMEOUT");
        assert!(timeout.is_timeout());

        let server = MeetRtcError::Server {
            method: "produce".to_string(),
            error: serde_json::json!("not allowed"),
        };
        assert_eq!(server.error_code(), "SERVER_ERROR");
        assert!(!server.is_timeout());

        assert_eq!(MeetRtcError::ClientNotReady.error_code(), "CLIENT_NOT_READY");
    }

    #[test]
    fn test_error_display() {
        let err = MeetRtcError::capability("cannot produce video");
        assert_eq!(err.to_string(), "Capability error: cannot produce video");

        let err = MeetRtcError::Timeout {
            method: "join".to_string(),
            attempts: 3,
            timeout: Duration::from_millis(20),
        };
        assert!(err.to_string().contains("after 3 attempt(s)"));
    }
}
