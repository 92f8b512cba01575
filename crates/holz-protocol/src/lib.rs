//! Holzworth Command Codec
//!
//! This crate translates typed instrument requests into wire bytes and
//! parses instrument replies back into typed results for the two Holzworth
//! command dialects:
//!
//! - **HS9000**: newline-terminated ASCII command strings with a single-line
//!   reply. The only primitive is "send command string, get reply string".
//! - **Legacy**: fixed-function parameter protocol with one opcode per
//!   operation and fixed-width big-endian payloads.
//!
//! # Architecture
//!
//! Each dialect module provides a [`DialectCodec`] implementation. The codec
//! is pure: it never performs I/O. Encoding yields the request bytes plus the
//! [`Framing`] the transport should use to read the reply; decoding checks the
//! reply shape and width before producing a [`Response`].
//!
//! # Example
//!
//! ```rust
//! use holz_protocol::{codec_for, Dialect, Request, Response};
//!
//! let codec = codec_for(Dialect::Legacy);
//! let encoded = codec.encode(&Request::ReadFrequency).unwrap();
//! assert_eq!(encoded.bytes, vec![0x31]);
//!
//! let mut reply = vec![0x00];
//! reply.extend_from_slice(&3_000_000_000i64.to_be_bytes());
//! let response = codec.decode(&Request::ReadFrequency, &reply).unwrap();
//! assert_eq!(response, Response::Long(3_000_000_000));
//! ```

use std::fmt;

pub mod command;
pub mod error;
pub mod hs9000;
pub mod legacy;
pub mod models;
pub mod units;

pub use command::{ModulationMode, Request, Response};
pub use error::{ParseError, ProtocolError};
pub use hs9000::{Channel, Hs9000Codec, Identity};
pub use legacy::LegacyCodec;
pub use models::{Hs9000Model, InstrumentScale, ModelDatabase};

/// Identifies which command dialect an instrument speaks
///
/// Fixed when the device is opened and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Dialect {
    /// HS9000-series ASCII command strings
    Hs9000,
    /// Legacy fixed-function parameter protocol
    Legacy,
}

impl Dialect {
    /// Returns a human-readable name for the dialect
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Hs9000 => "HS9000",
            Dialect::Legacy => "legacy",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the reply to a request is delimited on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Read up to and including a `\n` terminator, at most `max_len` bytes
    Line { max_len: usize },
    /// Read exactly this many bytes
    Fixed(usize),
}

/// An encoded request ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Request bytes
    pub bytes: Vec<u8>,
    /// Framing of the expected reply
    pub framing: Framing,
}

/// Object-safe trait for dialect codecs
pub trait DialectCodec: Send + Sync {
    /// The dialect this codec speaks
    fn dialect(&self) -> Dialect;

    /// Encode a request, or fail with [`ProtocolError::UnsupportedOperation`]
    fn encode(&self, request: &Request) -> Result<Encoded, ProtocolError>;

    /// Decode the reply to `request`
    fn decode(&self, request: &Request, reply: &[u8]) -> Result<Response, ProtocolError>;

    /// Returns whether the dialect can carry this request at all
    fn supports(&self, request: &Request) -> bool {
        !matches!(
            self.encode(request),
            Err(ProtocolError::UnsupportedOperation { .. })
        )
    }
}

/// Get the codec for a dialect
pub fn codec_for(dialect: Dialect) -> &'static dyn DialectCodec {
    match dialect {
        Dialect::Hs9000 => &Hs9000Codec,
        Dialect::Legacy => &LegacyCodec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_for_dialect() {
        assert_eq!(codec_for(Dialect::Hs9000).dialect(), Dialect::Hs9000);
        assert_eq!(codec_for(Dialect::Legacy).dialect(), Dialect::Legacy);
    }

    #[test]
    fn test_supports() {
        let hs = codec_for(Dialect::Hs9000);
        let legacy = codec_for(Dialect::Legacy);
        assert!(hs.supports(&Request::Raw(":IDN?".into())));
        assert!(!hs.supports(&Request::SetPhase(0)));
        assert!(legacy.supports(&Request::SetPhase(0)));
        assert!(!legacy.supports(&Request::Raw(":IDN?".into())));
    }

    #[test]
    fn test_dialect_display() {
        assert_eq!(Dialect::Hs9000.to_string(), "HS9000");
        assert_eq!(Dialect::Legacy.to_string(), "legacy");
    }
}
