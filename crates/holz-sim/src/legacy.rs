//! Simulated legacy synthesizer
//!
//! Decodes fixed-format request frames and answers with a status byte plus
//! the big-endian reading. Frames it cannot decode, including the HS9000
//! identification query, get no reply at all.

use holz_protocol::legacy::{self, STATUS_OK};
use holz_protocol::{Dialect, ModulationMode, Request, Response};
use tracing::{debug, trace};

use crate::SimulatedInstrument;

/// Status for a value outside the instrument's range
pub const STATUS_OUT_OF_RANGE: u8 = 0x02;
/// Status for recalling a state that was never saved
pub const STATUS_NO_SAVED_STATE: u8 = 0x03;

/// Frequency range accepted by the simulated instrument, in Hz
pub const FREQUENCY_RANGE: std::ops::RangeInclusive<i64> = 100_000..=24_000_000_000;
/// Power range in hundredths of a dB
pub const POWER_RANGE: std::ops::RangeInclusive<i16> = -10_000..=2_000;
/// Phase range in tenths of a degree
pub const PHASE_RANGE: std::ops::RangeInclusive<i16> = 0..=3_600;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Settings {
    rf_on: bool,
    power: i16,
    phase: i16,
    frequency_hz: i64,
    modulation: ModulationMode,
    fm_deviation: i16,
    pm_deviation: i16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rf_on: false,
            power: 0,
            phase: 0,
            frequency_hz: 1_000_000_000,
            modulation: ModulationMode::None,
            fm_deviation: 0,
            pm_deviation: 0,
        }
    }
}

/// A simulated legacy instrument
#[derive(Debug, Clone)]
pub struct SimulatedLegacy {
    serial: String,
    current: Settings,
    saved: Option<Settings>,
}

impl SimulatedLegacy {
    /// Create an instrument at factory settings
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            current: Settings::default(),
            saved: None,
        }
    }

    /// Current modulation mode
    pub fn modulation(&self) -> ModulationMode {
        self.current.modulation
    }

    fn execute(&mut self, request: &Request) -> (u8, Option<Response>) {
        let s = &mut self.current;
        let in_range = |ok: bool| if ok { STATUS_OK } else { STATUS_OUT_OF_RANGE };

        match *request {
            Request::RfPowerOn => s.rf_on = true,
            Request::RfPowerOff => s.rf_on = false,
            Request::IsRfPowerOn => return (STATUS_OK, Some(Response::Flag(s.rf_on))),
            Request::SetPower(v) => {
                let status = in_range(POWER_RANGE.contains(&v));
                if status == STATUS_OK {
                    s.power = v;
                }
                return (status, None);
            }
            Request::ReadPower => return (STATUS_OK, Some(Response::Short(s.power))),
            Request::SetPhase(v) => {
                let status = in_range(PHASE_RANGE.contains(&v));
                if status == STATUS_OK {
                    s.phase = v;
                }
                return (status, None);
            }
            Request::ReadPhase => return (STATUS_OK, Some(Response::Short(s.phase))),
            Request::SetFrequency(hz) => {
                let status = in_range(FREQUENCY_RANGE.contains(&hz));
                if status == STATUS_OK {
                    s.frequency_hz = hz;
                }
                return (status, None);
            }
            Request::ReadFrequency => return (STATUS_OK, Some(Response::Long(s.frequency_hz))),
            Request::RecallFactoryPreset => *s = Settings::default(),
            Request::SaveCurrentState => self.saved = Some(s.clone()),
            Request::RecallSavedState => match &self.saved {
                Some(saved) => *s = saved.clone(),
                None => return (STATUS_NO_SAVED_STATE, None),
            },
            Request::SetModulation(mode) => s.modulation = mode,
            Request::SetFmDeviation(v) => s.fm_deviation = v,
            Request::SetPmDeviation(v) => s.pm_deviation = v,
            Request::Raw(_) => return (STATUS_OUT_OF_RANGE, None),
        }
        (STATUS_OK, None)
    }
}

impl SimulatedInstrument for SimulatedLegacy {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn dialect(&self) -> Dialect {
        Dialect::Legacy
    }

    fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let request = match legacy::decode_request(request) {
            Ok(request) => request,
            Err(e) => {
                debug!("{} ignoring frame {:02X?}: {}", self.serial, request, e);
                return None;
            }
        };
        let (status, value) = self.execute(&request);
        trace!("{} {} -> status 0x{:02X}", self.serial, request.name(), status);
        Some(legacy::encode_reply(&request, status, value.as_ref()))
    }
}
