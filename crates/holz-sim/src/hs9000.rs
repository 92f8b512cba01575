//! Simulated HS9000-series synthesizer
//!
//! Answers the ASCII command set with the same acknowledgements and reading
//! formats as the instruments: `Frequency Set`, `800.0 MHz`, `-10 dBm`,
//! `90deg`, `RF POWER ON`.

use holz_protocol::hs9000::{self, ACK_FREQUENCY, ACK_PHASE, ACK_POWER};
use holz_protocol::{units, Dialect};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::SimulatedInstrument;

/// Reply for commands the instrument does not understand
pub const INVALID_COMMAND: &str = "Invalid Command";
/// Reply for values outside the channel's range
pub const INVALID_ENTRY: &str = "Invalid Entry";

const MIN_FREQUENCY_HZ: i64 = 10_000_000;
const MAX_FREQUENCY_HZ: i64 = 6_000_000_000;
const MIN_POWER_DBM: f64 = -100.0;
const MAX_POWER_DBM: f64 = 13.0;
const MIN_PHASE_DEG: f64 = 0.0;
const MAX_PHASE_DEG: f64 = 360.0;

/// Configuration for a simulated HS9000 instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedHs9000Config {
    /// Instrument serial number
    pub serial: String,
    /// Model name reported by `:IDN?`
    pub model: String,
    /// Number of RF channels
    pub channels: u8,
}

impl Default for SimulatedHs9000Config {
    fn default() -> Self {
        Self {
            serial: "HS01".to_string(),
            model: "HS9002B".to_string(),
            channels: 2,
        }
    }
}

#[derive(Debug, Clone)]
struct ChannelState {
    rf_on: bool,
    frequency_hz: i64,
    power_dbm: f64,
    phase_deg: f64,
    temperature_c: f64,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            rf_on: false,
            frequency_hz: 1_000_000_000,
            power_dbm: 0.0,
            phase_deg: 0.0,
            temperature_c: 35.2,
        }
    }
}

/// A simulated HS9000-series instrument
#[derive(Debug, Clone)]
pub struct SimulatedHs9000 {
    serial: String,
    model: String,
    channels: Vec<ChannelState>,
}

impl SimulatedHs9000 {
    /// Create a two-channel instrument
    pub fn new(serial: impl Into<String>) -> Self {
        Self::from_config(SimulatedHs9000Config {
            serial: serial.into(),
            ..Default::default()
        })
    }

    /// Create an instrument from configuration
    pub fn from_config(config: SimulatedHs9000Config) -> Self {
        Self {
            serial: config.serial,
            model: config.model,
            channels: vec![ChannelState::default(); usize::from(config.channels.max(1))],
        }
    }

    fn execute(&mut self, command: &str) -> String {
        let body = command.strip_prefix(':').unwrap_or(command);
        match body.to_ascii_uppercase().as_str() {
            "IDN?" => {
                return format!(
                    "Holzworth Instrumentation, {}, {}, 2.0",
                    self.model, self.serial
                )
            }
            "ATTACH?" => {
                let list: String = (1..=self.channels.len())
                    .map(|n| format!("CH{}:", n))
                    .collect();
                return format!(":{}", list);
            }
            _ => {}
        }

        let mut parts: Vec<&str> = body.split(':').collect();
        let index = match parts.first().map(|p| hs9000::Channel::parse(p)) {
            Some(Ok(ch)) => {
                parts.remove(0);
                usize::from(ch.0) - 1
            }
            _ => 0,
        };
        let Some(channel) = self.channels.get_mut(index) else {
            return INVALID_COMMAND.to_string();
        };

        let upper: Vec<String> = parts.iter().map(|p| p.to_ascii_uppercase()).collect();
        let upper: Vec<&str> = upper.iter().map(String::as_str).collect();

        match (upper.as_slice(), parts.as_slice()) {
            (["FREQ?"], _) => format_frequency(channel.frequency_hz),
            (["FREQ", "MIN?"], _) => format_frequency(MIN_FREQUENCY_HZ),
            (["FREQ", "MAX?"], _) => format_frequency(MAX_FREQUENCY_HZ),
            (["FREQ", _], [_, value]) => match units::parse_frequency_hz(value) {
                Ok(hz) if (MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&hz) => {
                    channel.frequency_hz = hz;
                    ACK_FREQUENCY.to_string()
                }
                _ => INVALID_ENTRY.to_string(),
            },
            (["PWR?"], _) => format!("{} dBm", channel.power_dbm),
            (["PWR", "MIN?"], _) => format!("{} dBm", MIN_POWER_DBM),
            (["PWR", "MAX?"], _) => format!("{} dBm", MAX_POWER_DBM),
            (["PWR", "RF?"], _) => if channel.rf_on { "ON" } else { "OFF" }.to_string(),
            (["PWR", "RF", "ON"], _) => {
                channel.rf_on = true;
                hs9000::rf_ack(true).to_string()
            }
            (["PWR", "RF", "OFF"], _) => {
                channel.rf_on = false;
                hs9000::rf_ack(false).to_string()
            }
            (["PWR", _], [_, value]) => match units::parse_reading(value, &["dBm"]) {
                Ok(dbm) if (MIN_POWER_DBM..=MAX_POWER_DBM).contains(&dbm) => {
                    channel.power_dbm = dbm;
                    ACK_POWER.to_string()
                }
                _ => INVALID_ENTRY.to_string(),
            },
            (["PHASE?"], _) => format!("{}deg", channel.phase_deg),
            (["PHASE", "MIN?"], _) => format!("{}deg", MIN_PHASE_DEG),
            (["PHASE", "MAX?"], _) => format!("{}deg", MAX_PHASE_DEG),
            (["PHASE", _], [_, value]) => match units::parse_reading(value, &["deg"]) {
                Ok(deg) if (MIN_PHASE_DEG..=MAX_PHASE_DEG).contains(&deg) => {
                    channel.phase_deg = deg;
                    ACK_PHASE.to_string()
                }
                _ => INVALID_ENTRY.to_string(),
            },
            (["TEMP?"], _) => format!("CH{} Temp = {}C", index + 1, channel.temperature_c),
            _ => INVALID_COMMAND.to_string(),
        }
    }
}

/// Format Hz as `"<MHz> MHz"` with at least one decimal, e.g. `"2500.0 MHz"`
fn format_frequency(hz: i64) -> String {
    let fraction = format!("{:06}", (hz % 1_000_000).abs());
    let fraction = fraction.trim_end_matches('0');
    let fraction = if fraction.is_empty() { "0" } else { fraction };
    format!("{}.{} MHz", hz / 1_000_000, fraction)
}

impl SimulatedInstrument for SimulatedHs9000 {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn dialect(&self) -> Dialect {
        Dialect::Hs9000
    }

    fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let text = std::str::from_utf8(request).ok()?;
        let command = text.strip_suffix('\n')?.trim_end_matches('\r');
        let reply = self.execute(command);
        trace!("{} {:?} -> {:?}", self.serial, command, reply);
        let mut bytes = reply.into_bytes();
        bytes.push(hs9000::TERMINATOR);
        Some(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ask(sim: &mut SimulatedHs9000, command: &str) -> String {
        let reply = sim.handle(format!("{}\n", command).as_bytes()).unwrap();
        String::from_utf8(reply).unwrap().trim_end().to_string()
    }

    #[test]
    fn test_identify() {
        let mut sim = SimulatedHs9000::new("HS01");
        assert_eq!(ask(&mut sim, ":IDN?"), "Holzworth Instrumentation, HS9002B, HS01, 2.0");
        assert_eq!(ask(&mut sim, ":ATTACH?"), ":CH1:CH2:");
    }

    #[test]
    fn test_unprefixed_frequency_addresses_first_channel() {
        let mut sim = SimulatedHs9000::new("HS01");
        assert_eq!(ask(&mut sim, "FREQ:2500000000"), "Frequency Set");
        assert_eq!(ask(&mut sim, "FREQ?"), "2500.0 MHz");
        assert_eq!(ask(&mut sim, ":CH1:FREQ?"), "2500.0 MHz");
        assert_eq!(ask(&mut sim, ":CH2:FREQ?"), "1000.0 MHz");
    }

    #[test]
    fn test_channel_commands() {
        let mut sim = SimulatedHs9000::new("HS01");
        assert_eq!(ask(&mut sim, ":CH2:PWR:-10.5dBm"), "Power Set");
        assert_eq!(ask(&mut sim, ":CH2:PWR?"), "-10.5 dBm");
        assert_eq!(ask(&mut sim, ":CH2:PHASE:90deg"), "Phase Set");
        assert_eq!(ask(&mut sim, ":CH2:PHASE?"), "90deg");
        assert_eq!(ask(&mut sim, ":CH2:PWR:RF:ON"), "RF POWER ON");
        assert_eq!(ask(&mut sim, ":CH2:PWR:RF?"), "ON");
        assert_eq!(ask(&mut sim, ":CH1:PWR:RF?"), "OFF");
        assert_eq!(ask(&mut sim, ":CH1:TEMP?"), "CH1 Temp = 35.2C");
    }

    #[test]
    fn test_invalid_commands() {
        let mut sim = SimulatedHs9000::new("HS01");
        assert_eq!(ask(&mut sim, ":CH9:FREQ?"), INVALID_COMMAND);
        assert_eq!(ask(&mut sim, "BOGUS"), INVALID_COMMAND);
        assert_eq!(ask(&mut sim, ":CH1:FREQ:99GHz"), INVALID_ENTRY);
        assert_eq!(ask(&mut sim, ":CH1:PWR:50dBm"), INVALID_ENTRY);
    }

    #[test]
    fn test_unterminated_request_is_ignored() {
        let mut sim = SimulatedHs9000::new("HS01");
        assert!(sim.handle(b":IDN?").is_none());
    }

    #[test]
    fn test_format_frequency() {
        assert_eq!(format_frequency(800_000_000), "800.0 MHz");
        assert_eq!(format_frequency(1_234_567_891), "1234.567891 MHz");
        assert_eq!(format_frequency(10_500_000), "10.5 MHz");
    }

    #[test]
    fn test_config_from_json() {
        let config: SimulatedHs9000Config =
            serde_json::from_str(r#"{"serial":"HS77","model":"HS9008B","channels":8}"#).unwrap();
        let mut sim = SimulatedHs9000::from_config(config);
        assert_eq!(ask(&mut sim, ":CH8:PWR:RF?"), "OFF");
    }
}
