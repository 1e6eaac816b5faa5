use crate::binary::Bytes;
use crate::metric::Metric;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default timestamp given to points without one: 2000-01-02T12:13:14Z.
pub const DEFAULT_TIME: i64 = 946_815_194_000_000_000;

/// Something a codec implementation can be run against.
pub trait CodecInput: Clone + Send + Sync + fmt::Debug + Serialize + 'static {
    /// A short stable identifier used to name reports about this input.
    fn fingerprint(&self) -> String;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PrecisionError {
    #[error("empty precision")]
    Empty,
    #[error("invalid precision {0:?}")]
    Invalid(String),
    #[error("unknown unit {unit:?} in precision {text:?}")]
    UnknownUnit { unit: String, text: String },
    #[error("precision {0:?} overflows")]
    Overflow(String),
    #[error("precision {0:?} is negative")]
    Negative(String),
}

/// The time unit used to interpret or scale a timestamp.
///
/// Written as a duration string such as `1ns`, `1µs`, `1ms` or `1s`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Precision(Duration);

impl Precision {
    pub const NANOSECOND: Precision = Precision(Duration::from_nanos(1));
    pub const MICROSECOND: Precision = Precision(Duration::from_micros(1));
    pub const MILLISECOND: Precision = Precision(Duration::from_millis(1));
    pub const SECOND: Precision = Precision(Duration::from_secs(1));

    pub fn new(duration: Duration) -> Self {
        Precision(duration)
    }

    pub fn duration(&self) -> Duration {
        self.0
    }
}

impl Default for Precision {
    fn default() -> Self {
        Precision::NANOSECOND
    }
}

impl fmt::Display for Precision {
    /// Writes `h`/`m`/`s` segments from one second up and a single unit with a
    /// decimal fraction below that, e.g. `1ms`, `1.5µs` or `1m0s`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        match nanos {
            0 => f.write_str("0s"),
            1..1_000 => write!(f, "{nanos}ns"),
            1_000..1_000_000 => write!(f, "{}{}µs", nanos / 1_000, fraction(nanos, 3)),
            1_000_000..1_000_000_000 => {
                write!(f, "{}{}ms", nanos / 1_000_000, fraction(nanos, 6))
            }
            _ => {
                let secs = nanos / 1_000_000_000;
                let (hours, minutes) = (secs / 3_600, secs / 60 % 60);
                if hours > 0 {
                    write!(f, "{hours}h{minutes}m")?;
                } else if minutes > 0 {
                    write!(f, "{minutes}m")?;
                }
                write!(f, "{}{}s", secs % 60, fraction(nanos, 9))
            }
        }
    }
}

/// The last `digits` decimal places of `value` as `.ddd`, without trailing
/// zeros, or an empty string when they are all zero.
fn fraction(value: u128, digits: u32) -> String {
    let part = value % 10u128.pow(digits);
    if part == 0 {
        return String::new();
    }
    let text = format!(".{part:0width$}", width = digits as usize);
    text.trim_end_matches('0').to_string()
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(1_000_000_000),
        "m" => Some(60 * 1_000_000_000),
        "h" => Some(3_600 * 1_000_000_000),
        _ => None,
    }
}

/// Digits past this many fractional places are ignored.
const MAX_FRACTION_DIGITS: usize = 18;

impl FromStr for Precision {
    type Err = PrecisionError;

    /// Parses an optional sign, then one or more
    /// `<decimal><unit>` segments such as `1ms`, `1.5µs` or `1m30s`.
    /// Negative durations are rejected.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Err(PrecisionError::Empty);
        }
        let invalid = || PrecisionError::Invalid(text.to_string());
        let overflow = || PrecisionError::Overflow(text.to_string());

        let (negative, body) = match text.as_bytes()[0] {
            b'-' => (true, &text[1..]),
            b'+' => (false, &text[1..]),
            _ => (false, text),
        };
        if body == "0" {
            return Ok(Precision(Duration::ZERO));
        }
        if body.is_empty() {
            return Err(invalid());
        }

        let mut total: u128 = 0;
        let mut rest = body;
        while !rest.is_empty() {
            let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            let whole = &rest[..int_len];
            rest = &rest[int_len..];
            let mut frac = "";
            if let Some(after_dot) = rest.strip_prefix('.') {
                let frac_len = after_dot
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(after_dot.len());
                frac = &after_dot[..frac_len];
                rest = &after_dot[frac_len..];
            }
            if whole.is_empty() && frac.is_empty() {
                return Err(invalid());
            }

            let unit_len = rest
                .find(|c: char| c == '.' || c.is_ascii_digit())
                .unwrap_or(rest.len());
            let unit = &rest[..unit_len];
            if unit.is_empty() {
                return Err(invalid());
            }
            let scale = unit_nanos(unit).ok_or_else(|| PrecisionError::UnknownUnit {
                unit: unit.to_string(),
                text: text.to_string(),
            })?;
            rest = &rest[unit_len..];

            let count = if whole.is_empty() {
                0
            } else {
                whole.parse::<u128>().map_err(|_| overflow())?
            };
            let mut nanos = count.checked_mul(scale).ok_or_else(overflow)?;
            let frac = &frac[..frac.len().min(MAX_FRACTION_DIGITS)];
            if !frac.is_empty() {
                let numerator = frac.parse::<u128>().map_err(|_| invalid())?;
                nanos += numerator * scale / 10u128.pow(frac.len() as u32);
            }
            total = total
                .checked_add(nanos)
                .filter(|n| *n <= u64::MAX as u128)
                .ok_or_else(overflow)?;
        }
        if negative && total > 0 {
            return Err(PrecisionError::Negative(text.to_string()));
        }
        // Bounded by the filter above.
        Ok(Precision(Duration::from_nanos(total as u64)))
    }
}

impl Serialize for Precision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Precision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Raw line-protocol text plus the settings a decoder needs to interpret it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeInput {
    pub text: Bytes,
    pub default_time: i64,
    pub precision: Precision,
}

impl DecodeInput {
    /// Input with the default timestamp and nanosecond precision.
    pub fn new(text: impl Into<Bytes>) -> Self {
        DecodeInput {
            text: text.into(),
            default_time: DEFAULT_TIME,
            precision: Precision::NANOSECOND,
        }
    }
}

impl CodecInput for DecodeInput {
    fn fingerprint(&self) -> String {
        format!("{:x}", md5::compute(self.text.as_slice()))
    }
}

/// A metric plus the settings an encoder needs to write it out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeInput {
    pub metric: Metric,
    pub omit_invalid_fields: bool,
    pub uint_support: bool,
    pub precision: Precision,
}

impl EncodeInput {
    pub fn new(metric: Metric) -> Self {
        EncodeInput {
            metric,
            omit_invalid_fields: false,
            uint_support: false,
            precision: Precision::NANOSECOND,
        }
    }
}

impl CodecInput for EncodeInput {
    fn fingerprint(&self) -> String {
        let text = serde_yaml::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        format!("{:x}", md5::compute(text.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_formats_with_mixed_units() {
        assert_eq!(Precision::NANOSECOND.to_string(), "1ns");
        assert_eq!(Precision::MICROSECOND.to_string(), "1µs");
        assert_eq!(Precision::MILLISECOND.to_string(), "1ms");
        assert_eq!(Precision::SECOND.to_string(), "1s");
        assert_eq!(Precision::new(Duration::from_secs(60)).to_string(), "1m0s");
        assert_eq!(Precision::new(Duration::from_secs(3_690)).to_string(), "1h1m30s");
        assert_eq!(Precision::new(Duration::from_micros(1_500)).to_string(), "1.5ms");
        assert_eq!(Precision::new(Duration::from_nanos(2_050)).to_string(), "2.05µs");
        assert_eq!(
            Precision::new(Duration::from_millis(61_250)).to_string(),
            "1m1.25s"
        );
        assert_eq!(Precision::new(Duration::ZERO).to_string(), "0s");
    }

    #[test]
    fn precision_parses_unit_spellings() {
        assert_eq!("1ns".parse::<Precision>(), Ok(Precision::NANOSECOND));
        assert_eq!("1us".parse::<Precision>(), Ok(Precision::MICROSECOND));
        assert_eq!("1µs".parse::<Precision>(), Ok(Precision::MICROSECOND));
        assert_eq!("1ms".parse::<Precision>(), Ok(Precision::MILLISECOND));
        assert_eq!("1s".parse::<Precision>(), Ok(Precision::SECOND));
        assert_eq!(
            "1m30s".parse::<Precision>(),
            Ok(Precision::new(Duration::from_secs(90)))
        );
        assert_eq!("0".parse::<Precision>(), Ok(Precision::new(Duration::ZERO)));
    }

    #[test]
    fn precision_parses_decimal_fractions() {
        assert_eq!(
            "1.5ms".parse::<Precision>(),
            Ok(Precision::new(Duration::from_micros(1_500)))
        );
        assert_eq!(
            ".5s".parse::<Precision>(),
            Ok(Precision::new(Duration::from_millis(500)))
        );
        assert_eq!("1.s".parse::<Precision>(), Ok(Precision::SECOND));
        assert_eq!("+1ms".parse::<Precision>(), Ok(Precision::MILLISECOND));
        assert_eq!("-0".parse::<Precision>(), Ok(Precision::new(Duration::ZERO)));
        for text in ["1.5ms", "1m0s", "1h1m30s", "2.05µs"] {
            let precision: Precision = text.parse().unwrap();
            assert_eq!(precision.to_string(), text);
        }
    }

    #[test]
    fn precision_rejects_garbage() {
        assert_eq!("".parse::<Precision>(), Err(PrecisionError::Empty));
        assert!(matches!("ns".parse::<Precision>(), Err(PrecisionError::Invalid(_))));
        assert!(matches!("5".parse::<Precision>(), Err(PrecisionError::Invalid(_))));
        assert!(matches!(
            "3days".parse::<Precision>(),
            Err(PrecisionError::UnknownUnit { .. })
        ));
        assert!(matches!(
            "99999999999999999999h".parse::<Precision>(),
            Err(PrecisionError::Overflow(_))
        ));
        assert_eq!(
            "-1ms".parse::<Precision>(),
            Err(PrecisionError::Negative("-1ms".into()))
        );
        assert!(matches!(".ms".parse::<Precision>(), Err(PrecisionError::Invalid(_))));
        assert!(matches!("-".parse::<Precision>(), Err(PrecisionError::Invalid(_))));
    }

    #[test]
    fn decode_input_uses_camel_case_keys() {
        let input = DecodeInput::new("cpu value=1");
        let text = serde_yaml::to_string(&input).unwrap();
        assert_eq!(
            text,
            "text: cpu value=1\ndefaultTime: 946815194000000000\nprecision: 1ns\n"
        );
        let back: DecodeInput = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, input);
    }

    #[test]
    fn encode_input_round_trips() {
        let input = EncodeInput {
            metric: Metric::new("m", 5).with_field("f", true),
            omit_invalid_fields: true,
            uint_support: true,
            precision: Precision::SECOND,
        };
        let text = serde_yaml::to_string(&input).unwrap();
        assert!(text.contains("omitInvalidFields: true"), "{text}");
        assert!(text.contains("uintSupport: true"), "{text}");
        let back: EncodeInput = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, input);
    }

    #[test]
    fn fingerprint_depends_on_content() {
        let a = DecodeInput::new("a");
        let b = DecodeInput::new("b");
        assert_eq!(a.fingerprint(), DecodeInput::new("a").fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), format!("{:x}", md5::compute(b"a")));
    }
}
