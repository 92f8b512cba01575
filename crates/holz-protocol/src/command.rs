//! Normalized instrument command representation
//!
//! [`Request`] is the dialect-independent description of one instrument
//! operation. Each dialect codec decides whether it can carry a request and
//! how the reply maps back onto a [`Response`].

/// Modulation source selection for legacy synthesizers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModulationMode {
    /// Modulation disabled
    None,
    /// Frequency modulation
    Fm,
    /// Pulse modulation
    Pulse,
    /// Phase modulation
    Pm,
}

impl ModulationMode {
    /// Returns a human-readable name for the mode
    pub fn name(&self) -> &'static str {
        match self {
            ModulationMode::None => "none",
            ModulationMode::Fm => "FM",
            ModulationMode::Pulse => "pulse",
            ModulationMode::Pm => "PM",
        }
    }
}

/// A single operation addressed to one instrument
///
/// Numeric payloads are in instrument units: power, phase and deviations are
/// scaled integers (see [`crate::models::InstrumentScale`]), frequency is
/// integral Hz.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Request {
    /// Free-form ASCII command string (HS9000 only)
    Raw(String),
    /// Enable the RF output
    RfPowerOn,
    /// Disable the RF output
    RfPowerOff,
    /// Query whether the RF output is enabled
    IsRfPowerOn,
    /// Set output power
    SetPower(i16),
    /// Read output power
    ReadPower,
    /// Set output phase
    SetPhase(i16),
    /// Read output phase
    ReadPhase,
    /// Set output frequency in Hz
    SetFrequency(i64),
    /// Read output frequency in Hz
    ReadFrequency,
    /// Restore the factory preset
    RecallFactoryPreset,
    /// Store the current state in instrument memory
    SaveCurrentState,
    /// Restore the state stored by [`Request::SaveCurrentState`]
    RecallSavedState,
    /// Select the modulation source
    SetModulation(ModulationMode),
    /// Set FM deviation
    SetFmDeviation(i16),
    /// Set PM deviation
    SetPmDeviation(i16),
}

impl Request {
    /// Short operation name used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Request::Raw(_) => "raw command",
            Request::RfPowerOn => "RF power on",
            Request::RfPowerOff => "RF power off",
            Request::IsRfPowerOn => "RF power query",
            Request::SetPower(_) => "set power",
            Request::ReadPower => "read power",
            Request::SetPhase(_) => "set phase",
            Request::ReadPhase => "read phase",
            Request::SetFrequency(_) => "set frequency",
            Request::ReadFrequency => "read frequency",
            Request::RecallFactoryPreset => "recall factory preset",
            Request::SaveCurrentState => "save current state",
            Request::RecallSavedState => "recall saved state",
            Request::SetModulation(_) => "set modulation",
            Request::SetFmDeviation(_) => "set FM deviation",
            Request::SetPmDeviation(_) => "set PM deviation",
        }
    }

    /// Returns whether the request changes instrument state
    ///
    /// Raw HS9000 commands ending in `?` are queries.
    pub fn is_state_changing(&self) -> bool {
        match self {
            Request::Raw(command) => !command.trim_end().ends_with('?'),
            Request::IsRfPowerOn
            | Request::ReadPower
            | Request::ReadPhase
            | Request::ReadFrequency => false,
            _ => true,
        }
    }
}

/// Decoded instrument reply
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Response {
    /// Command accepted, no value
    Ack,
    /// Boolean reading (RF output state)
    Flag(bool),
    /// 16-bit reading (power, phase)
    Short(i16),
    /// 64-bit reading (frequency)
    Long(i64),
    /// ASCII reply text
    Text(String),
}
