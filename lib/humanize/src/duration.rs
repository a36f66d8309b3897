use std::fmt::{Display, Formatter};
use std::time::Duration;

const NANOSECOND: u64 = 1;
const MICROSECOND: u64 = 1000 * NANOSECOND;
const MILLISECOND: u64 = 1000 * MICROSECOND;
const SECOND: u64 = 1000 * MILLISECOND;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseDurationError {
    InvalidDuration,
    MissingUnit,
    UnknownUnit,
    Overflow,
}

impl Display for ParseDurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseDurationError::InvalidDuration => f.write_str("invalid duration"),
            ParseDurationError::MissingUnit => f.write_str("missing unit in duration"),
            ParseDurationError::UnknownUnit => f.write_str("unknown unit in duration"),
            ParseDurationError::Overflow => f.write_str("duration out of range"),
        }
    }
}

impl std::error::Error for ParseDurationError {}

/// parse_duration parses a duration string, a sequence of decimal numbers
/// with optional fraction and a mandatory unit suffix, such as "300ms",
/// "1.5h" or "2h45m". Valid units are "ns", "us" ("µs"), "ms", "s", "m",
/// "h", "d" and "w".
pub fn parse_duration(text: &str) -> Result<Duration, ParseDurationError> {
    let mut rest = text.strip_prefix('+').unwrap_or(text);
    if text.starts_with('-') {
        return Err(ParseDurationError::InvalidDuration);
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(ParseDurationError::InvalidDuration);
    }

    let mut total = 0u64;
    while !rest.is_empty() {
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        let (int_part, after_int) = rest.split_at(digits);

        let (frac_part, after_frac) = match after_int.strip_prefix('.') {
            Some(tail) => {
                let digits = tail.len() - tail.trim_start_matches(|c: char| c.is_ascii_digit()).len();
                tail.split_at(digits)
            }
            None => ("", after_int),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(ParseDurationError::InvalidDuration);
        }

        let unit_len = after_frac
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_frac.len());
        let (unit_part, tail) = after_frac.split_at(unit_len);
        let unit = match unit_part {
            "ns" => NANOSECOND,
            "us" | "\u{b5}s" | "\u{3bc}s" => MICROSECOND,
            "ms" => MILLISECOND,
            "s" => SECOND,
            "m" => MINUTE,
            "h" => HOUR,
            "d" => DAY,
            "w" => WEEK,
            "" => return Err(ParseDurationError::MissingUnit),
            _ => return Err(ParseDurationError::UnknownUnit),
        };

        let whole = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse::<u64>()
                .map_err(|_| ParseDurationError::Overflow)?
        };
        let mut nanos = whole
            .checked_mul(unit)
            .ok_or(ParseDurationError::Overflow)?;
        if !frac_part.is_empty() {
            // f64 keeps nanosecond accuracy for fractions of the largest units
            let frac = frac_part
                .parse::<f64>()
                .map_err(|_| ParseDurationError::InvalidDuration)?
                / 10f64.powi(frac_part.len() as i32);
            nanos = nanos
                .checked_add((frac * unit as f64) as u64)
                .ok_or(ParseDurationError::Overflow)?;
        }

        total = total
            .checked_add(nanos)
            .ok_or(ParseDurationError::Overflow)?;
        rest = tail;
    }

    Ok(Duration::from_nanos(total))
}

/// format_duration renders a duration with the largest unit that divides it
/// evenly, so parse_duration(format_duration(d)) == d.
pub fn format_duration(d: &Duration) -> String {
    let nanos = d.as_nanos() as u64;
    if nanos == 0 {
        return "0s".to_string();
    }

    for (unit, suffix) in [
        (HOUR, "h"),
        (MINUTE, "m"),
        (SECOND, "s"),
        (MILLISECOND, "ms"),
        (MICROSECOND, "us"),
    ] {
        if nanos % unit == 0 {
            return format!("{}{}", nanos / unit, suffix);
        }
    }

    format!("{}ns", nanos)
}

pub mod serde {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_duration, parse_duration};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        parse_duration(&text).map_err(Error::custom)
    }

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let cases = [
            ("0", Duration::ZERO),
            ("5s", Duration::from_secs(5)),
            ("15s", Duration::from_secs(15)),
            ("30s", Duration::from_secs(30)),
            ("300ms", Duration::from_millis(300)),
            ("1478s", Duration::from_secs(1478)),
            ("1m30s", Duration::from_secs(90)),
            ("2h45m", Duration::from_secs(2 * 3600 + 45 * 60)),
            ("1.5h", Duration::from_secs(5400)),
            ("+5s", Duration::from_secs(5)),
            ("1d", Duration::from_secs(86400)),
            ("1w", Duration::from_secs(7 * 86400)),
            ("100ns", Duration::from_nanos(100)),
            ("3us", Duration::from_micros(3)),
            ("3\u{b5}s", Duration::from_micros(3)),
            ("0.1s", Duration::from_millis(100)),
            (".5s", Duration::from_millis(500)),
        ];

        for (input, want) in cases {
            assert_eq!(parse_duration(input), Ok(want), "input: {input}");
        }
    }

    #[test]
    fn parse_errors() {
        let cases = [
            ("", ParseDurationError::InvalidDuration),
            ("-5s", ParseDurationError::InvalidDuration),
            (".s", ParseDurationError::InvalidDuration),
            ("3", ParseDurationError::MissingUnit),
            ("10x", ParseDurationError::UnknownUnit),
            ("1m1", ParseDurationError::MissingUnit),
        ];

        for (input, want) in cases {
            assert_eq!(parse_duration(input), Err(want), "input: {input}");
        }
    }

    #[test]
    fn format() {
        let cases = [
            (Duration::ZERO, "0s"),
            (Duration::from_secs(15), "15s"),
            (Duration::from_secs(90), "90s"),
            (Duration::from_secs(3600), "1h"),
            (Duration::from_secs(120), "2m"),
            (Duration::from_millis(300), "300ms"),
            (Duration::from_nanos(1234), "1234ns"),
        ];

        for (input, want) in cases {
            assert_eq!(format_duration(&input), want);
            assert_eq!(parse_duration(want), Ok(input));
        }
    }

    #[test]
    fn with_serde() {
        #[derive(Debug, PartialEq, ::serde::Deserialize, ::serde::Serialize)]
        struct Wrapper {
            #[serde(with = "crate::duration::serde")]
            interval: Duration,
        }

        let w: Wrapper = serde_yaml::from_str("interval: 15s").unwrap();
        assert_eq!(w.interval, Duration::from_secs(15));

        let out = serde_yaml::to_string(&w).unwrap();
        assert_eq!(out, "interval: 15s\n");
    }
}
