//! Wire-level vocabulary of the statsd submission protocol.

use std::fmt;
use std::hash::Hasher as _;

use hash32::{FnvHasher, Hasher as _};
use serde::{Deserialize, Serialize};

/// Type used for counter values.
pub type CounterType = f64;

/// Type used for individual timer observations.
pub type TimerType = f64;

/// Type used for set elements after hashing.
pub type SetType = u32;

/// Type used for gauge values.
pub type GaugeType = f64;

/// The type of a metric, determining its aggregation and drain behavior.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    /// Counts instances of an event.
    ///
    /// Counter submissions are always deltas onto the running total, regardless of an explicit
    /// sign on the value.
    #[serde(rename = "c")]
    Counter,
    /// Stores the last reported value, or applies signed deltas to it.
    #[serde(rename = "g")]
    Gauge,
    /// Builds a distribution of observed values within one drain cycle.
    ///
    /// Based on individual reported values, timers allow to query the maximum, minimum, sum and
    /// statistical percentiles of the reported values.
    #[serde(rename = "ms")]
    Timer,
    /// Counts the number of unique reported values within one drain cycle.
    #[serde(rename = "s")]
    Set,
}

impl MetricType {
    /// Return the shortcode for this metric type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Gauge => "g",
            MetricType::Timer => "ms",
            MetricType::Set => "s",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricType {
    type Err = ParseError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        Ok(match string {
            "c" => Self::Counter,
            "g" => Self::Gauge,
            // `h` is a common histogram alias for timers.
            "ms" | "h" => Self::Timer,
            "s" => Self::Set,
            _ => return Err(ParseError::UnknownType),
        })
    }
}

/// An error returned for datagrams that cannot be parsed.
///
/// Every variant drops exactly the offending line; remaining lines of the same buffer are
/// unaffected.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// The metric name is empty or contains protocol delimiters.
    #[error("invalid metric name")]
    MalformedName,
    /// The value failed to parse as a number valid for the declared type.
    #[error("invalid metric value")]
    InvalidValue,
    /// The metric type token is not one of `c`, `g`, `ms`, `h` or `s`.
    #[error("unknown metric type")]
    UnknownType,
    /// The sample rate is unparsable or outside of `(0, 1]`.
    #[error("invalid sample rate")]
    InvalidSampleRate,
}

/// Whether the submitted value carried an explicit sign.
///
/// The sign is tracked separately from the numeric value so that `-0` and an unsigned `0` remain
/// distinguishable. Gauges use it to tell deltas from absolute sets.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sign {
    /// No explicit sign, the value is absolute.
    #[default]
    None,
    /// A leading `+`, the value is a positive delta.
    Plus,
    /// A leading `-`, the value is a negative delta.
    Minus,
}

impl Sign {
    /// Returns `true` if the value carried an explicit sign.
    pub fn is_explicit(self) -> bool {
        !matches!(self, Sign::None)
    }
}

/// Hashes a set value to a 32-bit integer.
pub(crate) fn hash_set_value(string: &str) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(string.as_bytes());
    hasher.finish32()
}

/// Validates a tag key.
pub(crate) fn is_valid_tag_key(tag_key: &str) -> bool {
    // iterating over bytes produces better asm, and we're only checking for ascii chars
    for &byte in tag_key.as_bytes() {
        if (byte as char).is_ascii_control() {
            return false;
        }
    }
    true
}

/// Validates a tag value.
///
/// Tag values are never entirely rejected, but invalid characters (ASCII control characters) are
/// stripped out.
pub(crate) fn validate_tag_value(tag_value: &mut String) {
    tag_value.retain(|c| !c.is_ascii_control());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_roundtrip() {
        for ty in [
            MetricType::Counter,
            MetricType::Gauge,
            MetricType::Timer,
            MetricType::Set,
        ] {
            assert_eq!(ty.as_str().parse::<MetricType>(), Ok(ty));
        }
    }

    #[test]
    fn test_histogram_alias() {
        assert_eq!("h".parse::<MetricType>(), Ok(MetricType::Timer));
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!("x".parse::<MetricType>(), Err(ParseError::UnknownType));
        assert_eq!("".parse::<MetricType>(), Err(ParseError::UnknownType));
    }

    #[test]
    fn test_hash_set_value_stable() {
        assert_eq!(hash_set_value("foo"), hash_set_value("foo"));
        assert_ne!(hash_set_value("foo"), hash_set_value("bar"));
    }

    #[test]
    fn test_tag_value_sanitized() {
        let mut value = "web\x00-1".to_owned();
        validate_tag_value(&mut value);
        assert_eq!(value, "web-1");
    }
}
