//! Error types for command encoding and reply parsing

use thiserror::Error;

use crate::Dialect;

/// Errors that can occur while parsing numeric or unit-suffixed values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input was empty after trimming
    #[error("empty value")]
    Empty,

    /// Input is not a decimal number
    #[error("invalid number: {0}")]
    InvalidNumber(String),

    /// Unit suffix is not accepted for this quantity
    #[error("unknown unit '{unit}' in {input}")]
    UnknownUnit { input: String, unit: String },

    /// Value has more precision than the instrument resolution
    #[error("{0} is finer than the instrument resolution")]
    TooPrecise(String),

    /// Value does not fit the wire width
    #[error("{0} is out of range")]
    OutOfRange(String),
}

/// Higher-level codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The request has no encoding in the device's dialect
    #[error("{operation} is not supported by {dialect} devices")]
    UnsupportedOperation {
        operation: &'static str,
        dialect: Dialect,
    },

    /// Reply did not match the expected format or width
    #[error("malformed reply to {operation}: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },

    /// Instrument answered but refused the command
    #[error("{operation} rejected by instrument: {reply}")]
    Rejected {
        operation: &'static str,
        reply: String,
    },

    /// Command string cannot be sent as a single ASCII line
    #[error("invalid command string {0:?}")]
    InvalidCommand(String),

    /// Value parse error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

impl ProtocolError {
    pub(crate) fn decode(operation: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::Decode {
            operation,
            reason: reason.into(),
        }
    }
}
