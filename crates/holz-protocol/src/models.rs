//! Instrument model data
//!
//! Legacy synthesizers carry power, phase and deviation as scaled 16-bit
//! integers. The scale is a property of the instrument family and is not
//! reported over the wire, so it is configured here.

/// Fixed-point scales used by the legacy parameter protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstrumentScale {
    /// Power units per dB (100 = 0.01 dB resolution)
    pub power_per_db: i16,
    /// Phase units per degree (10 = 0.1 degree resolution)
    pub phase_per_degree: i16,
    /// Hz represented by one FM deviation unit
    pub fm_deviation_hz_per_unit: i64,
    /// PM deviation units per degree
    pub pm_deviation_per_degree: i16,
}

impl InstrumentScale {
    /// Scale used by legacy HSM/HSX synthesizers
    pub const LEGACY: InstrumentScale = InstrumentScale {
        power_per_db: 100,
        phase_per_degree: 10,
        fm_deviation_hz_per_unit: 1000,
        pm_deviation_per_degree: 10,
    };

    /// Convert a power reading to dBm
    pub fn power_dbm(&self, units: i16) -> f64 {
        f64::from(units) / f64::from(self.power_per_db)
    }

    /// Convert a phase reading to degrees
    pub fn phase_degrees(&self, units: i16) -> f64 {
        f64::from(units) / f64::from(self.phase_per_degree)
    }
}

impl Default for InstrumentScale {
    fn default() -> Self {
        Self::LEGACY
    }
}

/// Information about an HS9000-series model
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Hs9000Model {
    /// Model name as reported by `:IDN?`
    pub model: String,
    /// Number of independent RF channels
    pub channels: u8,
}

impl Hs9000Model {
    fn new(model: &str, channels: u8) -> Self {
        Self {
            model: model.to_string(),
            channels,
        }
    }
}

/// Lookup table of known HS9000-series models
pub struct ModelDatabase;

impl ModelDatabase {
    /// All known HS9000-series models
    pub fn hs9000_models() -> Vec<Hs9000Model> {
        vec![
            Hs9000Model::new("HS9001B", 1),
            Hs9000Model::new("HS9002B", 2),
            Hs9000Model::new("HS9003B", 3),
            Hs9000Model::new("HS9004B", 4),
            Hs9000Model::new("HS9006B", 6),
            Hs9000Model::new("HS9008B", 8),
        ]
    }

    /// Look up an HS9000-series model by name (case-insensitive)
    pub fn by_name(name: &str) -> Option<Hs9000Model> {
        Self::hs9000_models()
            .into_iter()
            .find(|m| m.model.eq_ignore_ascii_case(name.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_scale_conversions() {
        let scale = InstrumentScale::default();
        assert_eq!(scale.power_dbm(-1025), -10.25);
        assert_eq!(scale.phase_degrees(900), 90.0);
    }

    #[test]
    fn test_model_lookup() {
        let model = ModelDatabase::by_name("hs9008b").unwrap();
        assert_eq!(model.channels, 8);
        assert!(ModelDatabase::by_name("HS1000").is_none());
    }
}
