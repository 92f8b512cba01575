//! HS9000-series ASCII command protocol
//!
//! HS9000 instruments take newline-terminated ASCII command strings and
//! answer every command with a single line. The public contract of this
//! dialect is one primitive, "write a command string, get the reply string";
//! the builders and parsers below are conveniences layered on top of it.
//!
//! # Format
//! - Commands: `:CH1:FREQ:1000000000Hz`, `:CH1:PWR?`, `:IDN?`
//! - Replies: `Frequency Set`, `800.0 MHz`, `Holzworth Instrumentation, HS9008B, 1234, 3.1`
//! - Terminator: `\n` (0x0A), replies may also carry `\r`
//!
//! Channel-less forms such as `FREQ:2500000000` address the first channel.

use std::fmt;

use crate::command::{Request, Response};
use crate::error::{ParseError, ProtocolError};
use crate::units;
use crate::{Dialect, DialectCodec, Encoded, Framing};

/// Line terminator for commands and replies
pub const TERMINATOR: u8 = b'\n';

/// Maximum accepted reply length
pub const MAX_REPLY_LEN: usize = 256;

/// Acknowledgement for a frequency set command
pub const ACK_FREQUENCY: &str = "Frequency Set";
/// Acknowledgement for a power set command
pub const ACK_POWER: &str = "Power Set";
/// Acknowledgement for a phase set command
pub const ACK_PHASE: &str = "Phase Set";

/// An RF channel of a multi-channel HS9000 instrument (`CH1`, `CH2`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Channel(pub u8);

impl Channel {
    /// Parse `"CH3"` (case-insensitive) into a channel
    pub fn parse(name: &str) -> Result<Self, ParseError> {
        let name = name.trim();
        let digits = name
            .get(..2)
            .filter(|prefix| prefix.eq_ignore_ascii_case("CH"))
            .map(|_| &name[2..])
            .ok_or_else(|| ParseError::InvalidNumber(name.to_string()))?;
        match digits.parse::<u8>() {
            Ok(n) if n > 0 => Ok(Channel(n)),
            _ => Err(ParseError::InvalidNumber(name.to_string())),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.0)
    }
}

/// Which end of a parameter range to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Min,
    Max,
}

impl Limit {
    fn suffix(self) -> &'static str {
        match self {
            Limit::Min => "MIN",
            Limit::Max => "MAX",
        }
    }
}

/// Command string builders
pub mod commands {
    use super::{Channel, Limit};

    /// Identification query
    pub fn identify() -> String {
        ":IDN?".to_string()
    }

    /// Attached channel list query
    pub fn attached_channels() -> String {
        ":ATTACH?".to_string()
    }

    /// Enable or disable a channel's RF output
    pub fn set_rf_output(ch: Channel, on: bool) -> String {
        format!(":{}:PWR:RF:{}", ch, if on { "ON" } else { "OFF" })
    }

    /// Query a channel's RF output state
    pub fn rf_output(ch: Channel) -> String {
        format!(":{}:PWR:RF?", ch)
    }

    /// Set a channel's frequency in Hz
    pub fn set_frequency(ch: Channel, hz: i64) -> String {
        format!(":{}:FREQ:{}Hz", ch, hz)
    }

    /// Query a channel's frequency
    pub fn frequency(ch: Channel) -> String {
        format!(":{}:FREQ?", ch)
    }

    /// Query a channel's frequency range
    pub fn frequency_limit(ch: Channel, limit: Limit) -> String {
        format!(":{}:FREQ:{}?", ch, limit.suffix())
    }

    /// Set a channel's power in dBm
    pub fn set_power(ch: Channel, dbm: f64) -> String {
        format!(":{}:PWR:{}dBm", ch, dbm)
    }

    /// Query a channel's power
    pub fn power(ch: Channel) -> String {
        format!(":{}:PWR?", ch)
    }

    /// Query a channel's power range
    pub fn power_limit(ch: Channel, limit: Limit) -> String {
        format!(":{}:PWR:{}?", ch, limit.suffix())
    }

    /// Set a channel's phase in degrees
    pub fn set_phase(ch: Channel, degrees: f64) -> String {
        format!(":{}:PHASE:{}deg", ch, degrees)
    }

    /// Query a channel's phase
    pub fn phase(ch: Channel) -> String {
        format!(":{}:PHASE?", ch)
    }

    /// Query a channel's phase range
    pub fn phase_limit(ch: Channel, limit: Limit) -> String {
        format!(":{}:PHASE:{}?", ch, limit.suffix())
    }

    /// Query a channel's temperature
    pub fn temperature(ch: Channel) -> String {
        format!(":{}:TEMP?", ch)
    }
}

/// Parsed `:IDN?` reply
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Identity {
    /// Manufacturer field
    pub manufacturer: String,
    /// Model name (e.g. `HS9008B`)
    pub model: String,
    /// Instrument serial number, if reported
    pub serial: Option<String>,
    /// Firmware revision, if reported
    pub firmware: Option<String>,
}

impl Identity {
    /// Parse `"Holzworth Instrumentation, HS9008B, 1234, 3.1"`
    ///
    /// Returns `None` unless the manufacturer field names Holzworth and a
    /// model field is present.
    pub fn parse(reply: &str) -> Option<Self> {
        let mut fields = reply.trim().split(',').map(str::trim);
        let manufacturer = fields.next()?;
        if !manufacturer.to_ascii_lowercase().starts_with("holzworth") {
            return None;
        }
        let model = fields.next().filter(|m| !m.is_empty())?;
        let serial = fields.next().filter(|s| !s.is_empty()).map(str::to_string);
        let firmware = fields.next().filter(|s| !s.is_empty()).map(str::to_string);
        Some(Self {
            manufacturer: manufacturer.to_string(),
            model: model.to_string(),
            serial,
            firmware,
        })
    }
}

/// Require an exact acknowledgement string
pub fn expect_ack(
    operation: &'static str,
    reply: &str,
    expected: &str,
) -> Result<(), ProtocolError> {
    if reply.trim() == expected {
        Ok(())
    } else {
        Err(ProtocolError::Rejected {
            operation,
            reply: reply.trim().to_string(),
        })
    }
}

/// Acknowledgement expected after [`commands::set_rf_output`]
pub fn rf_ack(on: bool) -> &'static str {
    if on {
        "RF POWER ON"
    } else {
        "RF POWER OFF"
    }
}

fn decode_error(operation: &'static str, err: ParseError) -> ProtocolError {
    ProtocolError::decode(operation, err.to_string())
}

/// Parse a frequency reply such as `"800.0 MHz"` or `"2500000000Hz"` into Hz
pub fn parse_frequency(reply: &str) -> Result<i64, ProtocolError> {
    units::parse_frequency_hz(reply).map_err(|e| decode_error("read frequency", e))
}

/// Parse a power reply such as `"-10"` or `"-10 dBm"`
pub fn parse_power(reply: &str) -> Result<f64, ProtocolError> {
    units::parse_reading(reply, &["dBm"]).map_err(|e| decode_error("read power", e))
}

/// Parse a phase reply such as `"90"` or `"90deg"`
pub fn parse_phase(reply: &str) -> Result<f64, ProtocolError> {
    units::parse_reading(reply, &["deg"]).map_err(|e| decode_error("read phase", e))
}

/// Parse an RF output state reply (`"ON"`, `"OFF"`, `"RF POWER ON"`)
pub fn parse_rf_state(reply: &str) -> Result<bool, ProtocolError> {
    match reply.trim().rsplit(' ').next() {
        Some(s) if s.eq_ignore_ascii_case("ON") => Ok(true),
        Some(s) if s.eq_ignore_ascii_case("OFF") => Ok(false),
        _ => Err(ProtocolError::decode(
            "RF power query",
            format!("expected ON or OFF, got {:?}", reply.trim()),
        )),
    }
}

/// Parse a temperature reply such as `"CH1 Temp = 35.2C"`
pub fn parse_temperature(reply: &str) -> Result<f64, ProtocolError> {
    let last = reply
        .trim()
        .rsplit(' ')
        .next()
        .ok_or_else(|| ProtocolError::decode("read temperature", "empty reply"))?;
    let value = last.strip_suffix('C').unwrap_or(last);
    value.parse::<f64>().map_err(|_| {
        ProtocolError::decode("read temperature", format!("unparseable {:?}", reply.trim()))
    })
}

/// Parse an `:ATTACH?` reply such as `":CH1:CH2:"` into channels
pub fn parse_channels(reply: &str) -> Result<Vec<Channel>, ProtocolError> {
    reply
        .trim()
        .split(':')
        .filter(|t| !t.is_empty())
        .filter(|t| t.len() > 2 && t[..2].eq_ignore_ascii_case("CH"))
        .map(|t| Channel::parse(t).map_err(|e| decode_error("list channels", e)))
        .collect()
}

/// Codec for the HS9000 dialect
#[derive(Debug, Default, Clone, Copy)]
pub struct Hs9000Codec;

impl DialectCodec for Hs9000Codec {
    fn dialect(&self) -> Dialect {
        Dialect::Hs9000
    }

    fn encode(&self, request: &Request) -> Result<Encoded, ProtocolError> {
        let Request::Raw(command) = request else {
            return Err(ProtocolError::UnsupportedOperation {
                operation: request.name(),
                dialect: Dialect::Hs9000,
            });
        };

        let command = command.trim_end_matches(['\r', '\n']);
        if command.is_empty() || !command.is_ascii() || command.contains('\n') {
            return Err(ProtocolError::InvalidCommand(command.to_string()));
        }

        let mut bytes = Vec::with_capacity(command.len() + 1);
        bytes.extend_from_slice(command.as_bytes());
        bytes.push(TERMINATOR);
        Ok(Encoded {
            bytes,
            framing: Framing::Line {
                max_len: MAX_REPLY_LEN,
            },
        })
    }

    fn decode(&self, request: &Request, reply: &[u8]) -> Result<Response, ProtocolError> {
        let operation = request.name();
        let Some((&last, body)) = reply.split_last() else {
            return Err(ProtocolError::decode(operation, "empty reply"));
        };
        if last != TERMINATOR {
            return Err(ProtocolError::decode(operation, "reply not terminated"));
        }
        let text = std::str::from_utf8(body)
            .ok()
            .filter(|s| s.is_ascii())
            .ok_or_else(|| ProtocolError::decode(operation, "reply is not ASCII"))?;
        Ok(Response::Text(text.trim_end_matches('\r').to_string()))
    }
}
