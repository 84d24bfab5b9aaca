use std::{fmt, str::FromStr, time::Duration};

/// A non-negative Go-format duration, as used by timeout and retry policy
/// fields: a sequence of decimal values with unit suffixes, e.g. `1h30m`,
/// `1.5s`, `300ms`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GoDuration(pub Duration);

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum DurationParseError {
    #[error("invalid unit: {}", EXPECTED_UNITS)]
    InvalidUnit,

    #[error("missing a unit: {}", EXPECTED_UNITS)]
    NoUnit,

    #[error("negative durations are not supported")]
    Negative,

    #[error("invalid floating-point number: {0}")]
    NotANumber(#[from] std::num::ParseFloatError),
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

impl From<GoDuration> for Duration {
    fn from(GoDuration(d): GoDuration) -> Self {
        d
    }
}

impl fmt::Display for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl FromStr for GoDuration {
    type Err = DurationParseError;

    fn from_str(mut s: &str) -> Result<Self, Self::Err> {
        fn unit_base(unit: &str) -> Result<Duration, DurationParseError> {
            const MINUTE: Duration = Duration::from_secs(60);
            match unit {
                "ns" => Ok(Duration::from_nanos(1)),
                // U+00B5 is the "micro sign"; U+03BC is the Greek letter mu.
                "us" | "\u{00b5}s" | "\u{03bc}s" => Ok(Duration::from_micros(1)),
                "ms" => Ok(Duration::from_millis(1)),
                "s" => Ok(Duration::from_secs(1)),
                "m" => Ok(MINUTE),
                "h" => Ok(MINUTE * 60),
                _ => Err(DurationParseError::InvalidUnit),
            }
        }

        if s.starts_with('-') {
            return Err(DurationParseError::Negative);
        }
        s = s.trim_start_matches('+');

        let mut total = Duration::ZERO;
        while !s.is_empty() {
            let Some(unit_start) = s.find(|c: char| c.is_alphabetic()) else {
                if s == "0" {
                    return Ok(Self(Duration::ZERO));
                }
                return Err(DurationParseError::NoUnit);
            };
            let (val, rest) = s.split_at(unit_start);
            let val = val.parse::<f64>()?;
            let unit = match rest.find(|c: char| !c.is_alphabetic()) {
                Some(next_numeric_start) => {
                    let (unit, rest) = rest.split_at(next_numeric_start);
                    s = rest;
                    unit
                }
                None => {
                    s = "";
                    rest
                }
            };
            total += unit_base(unit)?.mul_f64(val);
        }

        Ok(Self(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<Duration, DurationParseError> {
        s.parse::<GoDuration>().map(Into::into)
    }

    #[test]
    fn parses_simple_durations() {
        assert_eq!(parse("90s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse("300ms"), Ok(Duration::from_millis(300)));
        assert_eq!(parse("2h"), Ok(Duration::from_secs(2 * 60 * 60)));
        assert_eq!(parse("0"), Ok(Duration::ZERO));
    }

    #[test]
    fn parses_compound_and_fractional_durations() {
        assert_eq!(parse("1h30m"), Ok(Duration::from_secs(90 * 60)));
        assert_eq!(parse("1.5s"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse("1m30.5s"), Ok(Duration::from_millis(90_500)));
    }

    #[test]
    fn rejects_malformed_durations() {
        assert_eq!(parse("90"), Err(DurationParseError::NoUnit));
        assert_eq!(parse("90x"), Err(DurationParseError::InvalidUnit));
        assert_eq!(parse("-5s"), Err(DurationParseError::Negative));
        assert_eq!(parse("-"), Err(DurationParseError::Negative));
        assert!(parse("s").is_err());
    }
}
