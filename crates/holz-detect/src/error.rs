//! Error types for discovery and transport links

use thiserror::Error;

/// Errors reported by a [`Transport`](crate::Transport) or [`DeviceLink`](crate::DeviceLink)
#[derive(Debug, Error)]
pub enum TransportError {
    /// No device with this serial number is attached
    #[error("device {0} is not attached")]
    NotAttached(String),

    /// The device refused the write before any byte was sent
    ///
    /// This is the only transport error that is safe to retry.
    #[error("device {0} is busy")]
    Busy(String),

    /// Timeout waiting for the device
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// The link has been closed
    #[error("link closed")]
    Closed,

    /// Reply exceeded the framing limit
    #[error("reply exceeds {0} bytes")]
    Overrun(usize),

    /// I/O error on the link
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error
    #[error("serial port error: {0}")]
    SerialPort(#[from] serialport::Error),
}

impl TransportError {
    /// Returns whether the failure happened before any byte left the host
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Busy(_))
    }
}

/// Errors that can occur during discovery
#[derive(Debug, Error)]
pub enum DetectError {
    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),
}

impl From<DetectError> for TransportError {
    fn from(err: DetectError) -> Self {
        TransportError::Io(std::io::Error::other(err.to_string()))
    }
}
