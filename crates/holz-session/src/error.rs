//! Error types for the session manager

use holz_detect::TransportError;
use holz_protocol::{Dialect, ParseError, ProtocolError};
use thiserror::Error;

/// Errors returned by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// Serial is not attached, or not open when a command was issued
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Device is already open
    #[error("device already open: {0}")]
    AlreadyOpen(String),

    /// Opening the device did not complete in time
    #[error("timed out opening {serial} after {timeout_ms}ms")]
    OpenTimeout {
        /// Device serial
        serial: String,
        /// Configured open timeout
        timeout_ms: u64,
    },

    /// I/O failure below the protocol layer
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Reply did not match the expected format or width
    #[error("decode error on {serial}: {source}")]
    Decode {
        /// Device serial
        serial: String,
        /// Underlying codec error
        source: ProtocolError,
    },

    /// Operation is not available in the device's dialect
    #[error("{operation} is not supported by {serial} ({dialect} dialect)")]
    UnsupportedOperation {
        /// Device serial
        serial: String,
        /// Operation name
        operation: &'static str,
        /// Dialect the device speaks
        dialect: Dialect,
    },

    /// Device channel is latched in the faulted state
    #[error("device {0} is faulted; re-open it to recover")]
    DeviceFaulted(String),

    /// A string-form argument could not be converted
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Instrument answered with a failure status or unexpected acknowledgement
    #[error("{operation} rejected by {serial}: {reply}")]
    Rejected {
        /// Device serial
        serial: String,
        /// Operation name
        operation: &'static str,
        /// Status or reply text
        reply: String,
    },

    /// Command did not complete in time
    #[error("{operation} on {serial} timed out after {timeout_ms}ms")]
    Timeout {
        /// Device serial
        serial: String,
        /// Operation name
        operation: &'static str,
        /// Configured command timeout
        timeout_ms: u64,
    },
}

impl SessionError {
    /// Attach the device serial to a codec error
    pub(crate) fn protocol(serial: &str, err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnsupportedOperation { operation, dialect } => {
                SessionError::UnsupportedOperation {
                    serial: serial.to_string(),
                    operation,
                    dialect,
                }
            }
            ProtocolError::Rejected { operation, reply } => SessionError::Rejected {
                serial: serial.to_string(),
                operation,
                reply,
            },
            err @ ProtocolError::InvalidCommand(_) => SessionError::InvalidArgument(err.to_string()),
            ProtocolError::Parse(e) => e.into(),
            err @ ProtocolError::Decode { .. } => SessionError::Decode {
                serial: serial.to_string(),
                source: err,
            },
        }
    }

    /// Non-zero status code for callers that expect legacy integer results
    pub fn status_code(&self) -> i32 {
        match self {
            SessionError::DeviceNotFound(_) => 1,
            SessionError::AlreadyOpen(_) => 2,
            SessionError::OpenTimeout { .. } => 3,
            SessionError::Transport(_) => 4,
            SessionError::Decode { .. } => 5,
            SessionError::UnsupportedOperation { .. } => 6,
            SessionError::DeviceFaulted(_) => 7,
            SessionError::InvalidArgument(_) => 8,
            SessionError::Rejected { .. } => 9,
            SessionError::Timeout { .. } => 10,
        }
    }
}

impl From<ParseError> for SessionError {
    fn from(err: ParseError) -> Self {
        SessionError::InvalidArgument(err.to_string())
    }
}

/// Errors loading a [`crate::SessionConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is not valid JSON for the expected shape
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}
