//! Exact parsing of human-readable quantities
//!
//! String-form setters accept either a bare numeral or a numeral followed by
//! a unit (`"2.5 GHz"`, `"-10.25dBm"`, `"90 deg"`). Values are parsed as exact
//! decimals and converted to the instrument's integral representation; a
//! value that would need rounding is rejected rather than silently changed.

use crate::error::ParseError;

/// Largest power of ten applied while scaling
const MAX_EXPONENT: i32 = 36;

/// A decimal value `mantissa * 10^exponent`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Decimal {
    mantissa: i128,
    exponent: i32,
}

impl Decimal {
    fn parse(text: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidNumber(text.to_string());

        let (negative, body) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };

        let (digits_part, exp_part) = match body.find(['e', 'E']) {
            Some(idx) => (&body[..idx], Some(&body[idx + 1..])),
            None => (body, None),
        };

        let (int_digits, frac_digits) = match digits_part.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits_part, ""),
        };

        if int_digits.is_empty() && frac_digits.is_empty() {
            return Err(invalid());
        }
        if !int_digits.bytes().all(|b| b.is_ascii_digit())
            || !frac_digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let mut mantissa: i128 = 0;
        for b in int_digits.bytes().chain(frac_digits.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(b - b'0')))
                .ok_or_else(|| ParseError::OutOfRange(text.to_string()))?;
        }
        if negative {
            mantissa = -mantissa;
        }

        let mut exponent = -(frac_digits.len() as i32);
        if let Some(exp) = exp_part {
            let exp: i32 = exp.parse().map_err(|_| invalid())?;
            exponent = exponent
                .checked_add(exp)
                .ok_or_else(|| ParseError::OutOfRange(text.to_string()))?;
        }

        Ok(Self { mantissa, exponent })
    }

    /// Multiply by `factor * 10^shift` and require an integral result
    fn scale(self, factor: i128, shift: i32, input: &str) -> Result<i128, ParseError> {
        let out_of_range = || ParseError::OutOfRange(input.to_string());

        let value = self.mantissa.checked_mul(factor).ok_or_else(out_of_range)?;
        let exponent = self.exponent.saturating_add(shift);

        if value == 0 {
            return Ok(0);
        }
        if exponent >= 0 {
            if exponent > MAX_EXPONENT {
                return Err(out_of_range());
            }
            value
                .checked_mul(10i128.pow(exponent as u32))
                .ok_or_else(out_of_range)
        } else {
            if -exponent > MAX_EXPONENT {
                return Err(ParseError::TooPrecise(input.to_string()));
            }
            let divisor = 10i128.pow((-exponent) as u32);
            if value % divisor != 0 {
                return Err(ParseError::TooPrecise(input.to_string()));
            }
            Ok(value / divisor)
        }
    }
}

/// Split `"12.5 MHz"` into `("12.5", "MHz")`
fn split_unit(input: &str) -> Result<(&str, &str), ParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let number_end = trimmed
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_ascii_digit() || *c == '.')
        .map(|(idx, c)| idx + c.len_utf8())
        .unwrap_or(0);

    let number = trimmed[..number_end].trim();
    let unit = trimmed[number_end..].trim();
    if number.is_empty() {
        return Err(ParseError::InvalidNumber(input.to_string()));
    }
    Ok((number, unit))
}

/// Resolve a unit against a table of `(name, power-of-ten)` pairs
fn unit_exponent(input: &str, unit: &str, table: &[(&str, i32)]) -> Result<i32, ParseError> {
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(unit))
        .map(|(_, exp)| *exp)
        .ok_or_else(|| ParseError::UnknownUnit {
            input: input.to_string(),
            unit: unit.to_string(),
        })
}

const FREQUENCY_UNITS: &[(&str, i32)] = &[("", 0), ("Hz", 0), ("kHz", 3), ("MHz", 6), ("GHz", 9)];
const POWER_UNITS: &[(&str, i32)] = &[("", 0), ("dBm", 0), ("dB", 0)];
const ANGLE_UNITS: &[(&str, i32)] = &[("", 0), ("deg", 0), ("degrees", 0), ("°", 0)];

fn to_i16(value: i128, input: &str) -> Result<i16, ParseError> {
    i16::try_from(value).map_err(|_| ParseError::OutOfRange(input.to_string()))
}

/// Parse a frequency into integral Hz
///
/// Accepts `"3000000000"`, `"3 GHz"`, `"2500.0 MHz"`, `"10kHz"`, `"1.5e9"`.
pub fn parse_frequency_hz(input: &str) -> Result<i64, ParseError> {
    let (number, unit) = split_unit(input)?;
    let shift = unit_exponent(input, unit, FREQUENCY_UNITS)?;
    let hz = Decimal::parse(number)?.scale(1, shift, input)?;
    i64::try_from(hz).map_err(|_| ParseError::OutOfRange(input.to_string()))
}

/// Parse a power level in dBm into instrument units of `1/per_db` dB
pub fn parse_power(input: &str, per_db: i16) -> Result<i16, ParseError> {
    let (number, unit) = split_unit(input)?;
    let shift = unit_exponent(input, unit, POWER_UNITS)?;
    let value = Decimal::parse(number)?.scale(i128::from(per_db), shift, input)?;
    to_i16(value, input)
}

/// Parse an angle in degrees into instrument units of `1/per_degree` degree
pub fn parse_angle(input: &str, per_degree: i16) -> Result<i16, ParseError> {
    let (number, unit) = split_unit(input)?;
    let shift = unit_exponent(input, unit, ANGLE_UNITS)?;
    let value = Decimal::parse(number)?.scale(i128::from(per_degree), shift, input)?;
    to_i16(value, input)
}

/// Parse an FM deviation into instrument units of `hz_per_unit` Hz
///
/// A bare numeral is taken as Hz.
pub fn parse_fm_deviation(input: &str, hz_per_unit: i64) -> Result<i16, ParseError> {
    let hz = parse_frequency_hz(input)?;
    if hz_per_unit <= 0 || hz % hz_per_unit != 0 {
        return Err(ParseError::TooPrecise(input.to_string()));
    }
    to_i16(i128::from(hz / hz_per_unit), input)
}

/// Parse a reply value that may carry a unit suffix, e.g. `"-10.5 dBm"`
///
/// Used for HS9000 readings where the instrument formats floats.
pub fn parse_reading(input: &str, unit_suffixes: &[&str]) -> Result<f64, ParseError> {
    let (number, unit) = split_unit(input)?;
    if !unit.is_empty() && !unit_suffixes.iter().any(|u| u.eq_ignore_ascii_case(unit)) {
        return Err(ParseError::UnknownUnit {
            input: input.to_string(),
            unit: unit.to_string(),
        });
    }
    number
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frequency_bare_hz() {
        assert_eq!(parse_frequency_hz("3000000000"), Ok(3_000_000_000));
    }

    #[test]
    fn test_frequency_with_units() {
        assert_eq!(parse_frequency_hz("3 GHz"), Ok(3_000_000_000));
        assert_eq!(parse_frequency_hz("2500.0 MHz"), Ok(2_500_000_000));
        assert_eq!(parse_frequency_hz("10kHz"), Ok(10_000));
        assert_eq!(parse_frequency_hz("2500000000Hz"), Ok(2_500_000_000));
        assert_eq!(parse_frequency_hz(" 1.000000001 ghz "), Ok(1_000_000_001));
    }

    #[test]
    fn test_frequency_exponent() {
        assert_eq!(parse_frequency_hz("1.5e9"), Ok(1_500_000_000));
        assert_eq!(parse_frequency_hz("25E8 Hz"), Ok(2_500_000_000));
    }

    #[test]
    fn test_frequency_fractional_hz_rejected() {
        assert!(matches!(
            parse_frequency_hz("1.5 Hz"),
            Err(ParseError::TooPrecise(_))
        ));
    }

    #[test]
    fn test_frequency_errors() {
        assert_eq!(parse_frequency_hz("   "), Err(ParseError::Empty));
        assert!(matches!(
            parse_frequency_hz("GHz"),
            Err(ParseError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse_frequency_hz("10 THz"),
            Err(ParseError::UnknownUnit { .. })
        ));
        assert!(matches!(
            parse_frequency_hz("1.2.3"),
            Err(ParseError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse_frequency_hz("99999999999 GHz"),
            Err(ParseError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_power() {
        assert_eq!(parse_power("-10.25 dBm", 100), Ok(-1025));
        assert_eq!(parse_power("5", 100), Ok(500));
        assert_eq!(parse_power("+13dBm", 100), Ok(1300));
        assert!(matches!(
            parse_power("-10.255", 100),
            Err(ParseError::TooPrecise(_))
        ));
        assert!(matches!(
            parse_power("400", 100),
            Err(ParseError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_angle() {
        assert_eq!(parse_angle("90deg", 10), Ok(900));
        assert_eq!(parse_angle("45.5 degrees", 10), Ok(455));
        assert_eq!(parse_angle("180°", 10), Ok(1800));
        assert_eq!(parse_angle("-0.1", 10), Ok(-1));
    }

    #[test]
    fn test_fm_deviation() {
        assert_eq!(parse_fm_deviation("50 kHz", 1000), Ok(50));
        assert_eq!(parse_fm_deviation("2000", 1000), Ok(2));
        assert!(matches!(
            parse_fm_deviation("1500 Hz", 1000),
            Err(ParseError::TooPrecise(_))
        ));
    }

    #[test]
    fn test_reading() {
        assert_eq!(parse_reading("-10.5 dBm", &["dBm"]), Ok(-10.5));
        assert_eq!(parse_reading("12", &["dBm"]), Ok(12.0));
        assert_eq!(parse_reading("90.0deg", &["deg"]), Ok(90.0));
        assert!(parse_reading("3 V", &["dBm"]).is_err());
    }

    proptest! {
        #[test]
        fn frequency_hz_text_is_exact(hz in 0i64..=40_000_000_000i64) {
            prop_assert_eq!(parse_frequency_hz(&hz.to_string()), Ok(hz));
            prop_assert_eq!(parse_frequency_hz(&format!("{}Hz", hz)), Ok(hz));
        }

        #[test]
        fn frequency_mhz_text_is_exact(hz in 0i64..=40_000_000_000i64) {
            let text = format!("{}.{:06} MHz", hz / 1_000_000, hz % 1_000_000);
            prop_assert_eq!(parse_frequency_hz(&text), Ok(hz));
        }

        #[test]
        fn power_centi_db_is_exact(units in -3000i16..=3000i16) {
            let sign = if units < 0 { "-" } else { "" };
            let abs = units.unsigned_abs();
            let text = format!("{}{}.{:02} dBm", sign, abs / 100, abs % 100);
            prop_assert_eq!(parse_power(&text, 100), Ok(units));
        }
    }
}
