//! Legacy fixed-function parameter protocol
//!
//! Pre-HS9000 synthesizers expose one fixed-format request per operation.
//!
//! # Format
//! - Request: opcode byte, then a big-endian payload whose width is fixed by
//!   the opcode (`i16` for power/phase/deviation, `i64` for frequency)
//! - Reply: status byte (`0x00` = success), then a big-endian payload for
//!   read operations (`i16` for power/phase/RF state, `i64` for frequency)
//!
//! Every reply length is known from the request, so a reply that is short,
//! long, or out of domain is a decode error rather than a guess.

use tracing::debug;

use crate::command::{ModulationMode, Request, Response};
use crate::error::ProtocolError;
use crate::{Dialect, DialectCodec, Encoded, Framing};

/// Reply status byte for success
pub const STATUS_OK: u8 = 0x00;

/// Request opcodes
pub mod opcode {
    pub const RF_POWER_ON: u8 = 0x01;
    pub const RF_POWER_OFF: u8 = 0x02;
    pub const IS_RF_POWER_ON: u8 = 0x03;
    pub const SET_POWER: u8 = 0x10;
    pub const READ_POWER: u8 = 0x11;
    pub const SET_PHASE: u8 = 0x20;
    pub const READ_PHASE: u8 = 0x21;
    pub const SET_FREQUENCY: u8 = 0x30;
    pub const READ_FREQUENCY: u8 = 0x31;
    pub const RECALL_FACTORY_PRESET: u8 = 0x40;
    pub const SAVE_CURRENT_STATE: u8 = 0x41;
    pub const RECALL_SAVED_STATE: u8 = 0x42;
    pub const MOD_NONE: u8 = 0x50;
    pub const MOD_FM: u8 = 0x51;
    pub const MOD_PULSE: u8 = 0x52;
    pub const MOD_PM: u8 = 0x53;
    pub const SET_FM_DEVIATION: u8 = 0x60;
    pub const SET_PM_DEVIATION: u8 = 0x61;
}

/// Width of the value carried in a read reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyValue {
    None,
    Flag,
    Short,
    Long,
}

impl ReplyValue {
    fn width(self) -> usize {
        match self {
            ReplyValue::None => 0,
            ReplyValue::Flag | ReplyValue::Short => 2,
            ReplyValue::Long => 8,
        }
    }
}

fn reply_value(request: &Request) -> ReplyValue {
    match request {
        Request::IsRfPowerOn => ReplyValue::Flag,
        Request::ReadPower | Request::ReadPhase => ReplyValue::Short,
        Request::ReadFrequency => ReplyValue::Long,
        _ => ReplyValue::None,
    }
}

/// Total reply length (status byte plus payload) for a request
pub fn reply_len(request: &Request) -> usize {
    1 + reply_value(request).width()
}

/// Encode a request into its fixed-format frame
pub fn encode_request(request: &Request) -> Result<Vec<u8>, ProtocolError> {
    let frame = match request {
        Request::Raw(_) => {
            return Err(ProtocolError::UnsupportedOperation {
                operation: request.name(),
                dialect: Dialect::Legacy,
            })
        }
        Request::RfPowerOn => vec![opcode::RF_POWER_ON],
        Request::RfPowerOff => vec![opcode::RF_POWER_OFF],
        Request::IsRfPowerOn => vec![opcode::IS_RF_POWER_ON],
        Request::SetPower(v) => with_short(opcode::SET_POWER, *v),
        Request::ReadPower => vec![opcode::READ_POWER],
        Request::SetPhase(v) => with_short(opcode::SET_PHASE, *v),
        Request::ReadPhase => vec![opcode::READ_PHASE],
        Request::SetFrequency(hz) => {
            let mut frame = vec![opcode::SET_FREQUENCY];
            frame.extend_from_slice(&hz.to_be_bytes());
            frame
        }
        Request::ReadFrequency => vec![opcode::READ_FREQUENCY],
        Request::RecallFactoryPreset => vec![opcode::RECALL_FACTORY_PRESET],
        Request::SaveCurrentState => vec![opcode::SAVE_CURRENT_STATE],
        Request::RecallSavedState => vec![opcode::RECALL_SAVED_STATE],
        Request::SetModulation(mode) => vec![match mode {
            ModulationMode::None => opcode::MOD_NONE,
            ModulationMode::Fm => opcode::MOD_FM,
            ModulationMode::Pulse => opcode::MOD_PULSE,
            ModulationMode::Pm => opcode::MOD_PM,
        }],
        Request::SetFmDeviation(v) => with_short(opcode::SET_FM_DEVIATION, *v),
        Request::SetPmDeviation(v) => with_short(opcode::SET_PM_DEVIATION, *v),
    };
    Ok(frame)
}

fn with_short(op: u8, value: i16) -> Vec<u8> {
    let mut frame = vec![op];
    frame.extend_from_slice(&value.to_be_bytes());
    frame
}

fn read_short(data: &[u8], operation: &'static str) -> Result<i16, ProtocolError> {
    let bytes: [u8; 2] = data
        .try_into()
        .map_err(|_| ProtocolError::decode(operation, format!("expected 2 bytes, got {}", data.len())))?;
    Ok(i16::from_be_bytes(bytes))
}

fn read_long(data: &[u8], operation: &'static str) -> Result<i64, ProtocolError> {
    let bytes: [u8; 8] = data
        .try_into()
        .map_err(|_| ProtocolError::decode(operation, format!("expected 8 bytes, got {}", data.len())))?;
    Ok(i64::from_be_bytes(bytes))
}

/// Decode a request frame (instrument side)
pub fn decode_request(frame: &[u8]) -> Result<Request, ProtocolError> {
    const OP: &str = "decode request";
    let (&op, payload) = frame
        .split_first()
        .ok_or_else(|| ProtocolError::decode(OP, "empty frame"))?;

    let no_payload = |req: Request| {
        if payload.is_empty() {
            Ok(req)
        } else {
            Err(ProtocolError::decode(OP, "unexpected payload"))
        }
    };

    match op {
        opcode::RF_POWER_ON => no_payload(Request::RfPowerOn),
        opcode::RF_POWER_OFF => no_payload(Request::RfPowerOff),
        opcode::IS_RF_POWER_ON => no_payload(Request::IsRfPowerOn),
        opcode::SET_POWER => Ok(Request::SetPower(read_short(payload, OP)?)),
        opcode::READ_POWER => no_payload(Request::ReadPower),
        opcode::SET_PHASE => Ok(Request::SetPhase(read_short(payload, OP)?)),
        opcode::READ_PHASE => no_payload(Request::ReadPhase),
        opcode::SET_FREQUENCY => Ok(Request::SetFrequency(read_long(payload, OP)?)),
        opcode::READ_FREQUENCY => no_payload(Request::ReadFrequency),
        opcode::RECALL_FACTORY_PRESET => no_payload(Request::RecallFactoryPreset),
        opcode::SAVE_CURRENT_STATE => no_payload(Request::SaveCurrentState),
        opcode::RECALL_SAVED_STATE => no_payload(Request::RecallSavedState),
        opcode::MOD_NONE => no_payload(Request::SetModulation(ModulationMode::None)),
        opcode::MOD_FM => no_payload(Request::SetModulation(ModulationMode::Fm)),
        opcode::MOD_PULSE => no_payload(Request::SetModulation(ModulationMode::Pulse)),
        opcode::MOD_PM => no_payload(Request::SetModulation(ModulationMode::Pm)),
        opcode::SET_FM_DEVIATION => Ok(Request::SetFmDeviation(read_short(payload, OP)?)),
        opcode::SET_PM_DEVIATION => Ok(Request::SetPmDeviation(read_short(payload, OP)?)),
        other => Err(ProtocolError::decode(OP, format!("unknown opcode 0x{:02X}", other))),
    }
}

/// Encode a reply frame (instrument side)
///
/// A non-zero `status` produces a full-width frame with a zeroed payload.
pub fn encode_reply(request: &Request, status: u8, value: Option<&Response>) -> Vec<u8> {
    let mut frame = vec![status];
    match (reply_value(request), value) {
        (ReplyValue::None, _) => {}
        (ReplyValue::Flag, Some(Response::Flag(on))) => {
            frame.extend_from_slice(&i16::from(*on).to_be_bytes())
        }
        (ReplyValue::Short, Some(Response::Short(v))) => frame.extend_from_slice(&v.to_be_bytes()),
        (ReplyValue::Long, Some(Response::Long(v))) => frame.extend_from_slice(&v.to_be_bytes()),
        (kind, _) => frame.extend(std::iter::repeat(0).take(kind.width())),
    }
    frame
}

/// Codec for the legacy dialect
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyCodec;

impl DialectCodec for LegacyCodec {
    fn dialect(&self) -> Dialect {
        Dialect::Legacy
    }

    fn encode(&self, request: &Request) -> Result<Encoded, ProtocolError> {
        Ok(Encoded {
            bytes: encode_request(request)?,
            framing: Framing::Fixed(reply_len(request)),
        })
    }

    fn decode(&self, request: &Request, reply: &[u8]) -> Result<Response, ProtocolError> {
        let operation = request.name();
        let expected = reply_len(request);
        if reply.len() != expected {
            return Err(ProtocolError::decode(
                operation,
                format!("expected {} bytes, got {}", expected, reply.len()),
            ));
        }

        let (&status, payload) = reply
            .split_first()
            .ok_or_else(|| ProtocolError::decode(operation, "empty reply"))?;
        if status != STATUS_OK {
            debug!("{} rejected with status 0x{:02X}", operation, status);
            return Err(ProtocolError::Rejected {
                operation,
                reply: format!("status 0x{:02X}", status),
            });
        }

        match reply_value(request) {
            ReplyValue::None => Ok(Response::Ack),
            ReplyValue::Flag => match read_short(payload, operation)? {
                0 => Ok(Response::Flag(false)),
                1 => Ok(Response::Flag(true)),
                other => Err(ProtocolError::decode(
                    operation,
                    format!("RF state {} is neither 0 nor 1", other),
                )),
            },
            ReplyValue::Short => Ok(Response::Short(read_short(payload, operation)?)),
            ReplyValue::Long => Ok(Response::Long(read_long(payload, operation)?)),
        }
    }
}
