//! Parsing of statsd wire-format datagrams.

use std::collections::BTreeMap;
use std::fmt;
use std::iter::FusedIterator;

use serde::{Deserialize, Serialize};

use crate::protocol::{self, hash_set_value, MetricType, ParseError, SetType, Sign, TimerType};

/// A numeric value together with its explicit-sign flag.
///
/// Counters and gauges interpret an explicit sign as a delta, see [`Sign`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedValue {
    /// The parsed value, including its sign.
    pub value: f64,
    /// Whether the submission carried an explicit leading `+` or `-`.
    pub sign: Sign,
}

impl SignedValue {
    fn parse(string: &str) -> Result<Self, ParseError> {
        let sign = match string.as_bytes().first() {
            Some(b'+') => Sign::Plus,
            Some(b'-') => Sign::Minus,
            _ => Sign::None,
        };

        let value: f64 = string.parse().map_err(|_| ParseError::InvalidValue)?;
        if !value.is_finite() {
            return Err(ParseError::InvalidValue);
        }

        Ok(Self { value, sign })
    }
}

impl fmt::Display for SignedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // A negative value renders its own sign. `-0` also renders as `-0`.
        if self.sign == Sign::Plus {
            f.write_str("+")?;
        }
        self.value.fmt(f)
    }
}

/// The typed value of a [`Datagram`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum DatagramValue {
    /// A counter increment. See [`MetricType::Counter`].
    #[serde(rename = "c")]
    Counter(SignedValue),
    /// A gauge set or delta. See [`MetricType::Gauge`].
    #[serde(rename = "g")]
    Gauge(SignedValue),
    /// A single non-negative timer observation. See [`MetricType::Timer`].
    #[serde(rename = "ms")]
    Timer(TimerType),
    /// A set element. See [`MetricType::Set`].
    ///
    /// Set values can be specified as arbitrary strings in the submission protocol. They are
    /// always hashed into a 32-bit value and the original value is dropped. If the submission
    /// contains a 32-bit integer, it is used directly, instead.
    #[serde(rename = "s")]
    Set(SetType),
}

impl DatagramValue {
    fn parse(string: &str, ty: MetricType) -> Result<Self, ParseError> {
        Ok(match ty {
            MetricType::Counter => Self::Counter(SignedValue::parse(string)?),
            MetricType::Gauge => Self::Gauge(SignedValue::parse(string)?),
            MetricType::Timer => {
                let value: TimerType = string.parse().map_err(|_| ParseError::InvalidValue)?;
                if !value.is_finite() || value.is_sign_negative() {
                    return Err(ParseError::InvalidValue);
                }
                Self::Timer(value)
            }
            MetricType::Set => {
                Self::Set(string.parse().unwrap_or_else(|_| hash_set_value(string)))
            }
        })
    }

    /// Returns the type of this value.
    pub fn ty(&self) -> MetricType {
        match self {
            Self::Counter(_) => MetricType::Counter,
            Self::Gauge(_) => MetricType::Gauge,
            Self::Timer(_) => MetricType::Timer,
            Self::Set(_) => MetricType::Set,
        }
    }
}

impl fmt::Display for DatagramValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatagramValue::Counter(value) => value.fmt(f),
            DatagramValue::Gauge(value) => value.fmt(f),
            DatagramValue::Timer(value) => value.fmt(f),
            DatagramValue::Set(value) => value.fmt(f),
        }
    }
}

/// Parses tags in the format `key=value,key=value`.
///
/// Entries without a `=` or with an empty or invalid key are skipped individually, the datagram
/// remains accepted. Duplicate keys collapse to the last occurrence.
fn parse_tags(string: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();

    for pair in string.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };

        if key.is_empty() || !protocol::is_valid_tag_key(key) {
            continue;
        }

        let mut value = value.to_owned();
        protocol::validate_tag_value(&mut value);

        map.insert(key.to_owned(), value);
    }

    map
}

/// Parses a sample rate, which must be a rational in `(0, 1]`.
fn parse_sample_rate(string: &str) -> Result<f64, ParseError> {
    let rate: f64 = string.parse().map_err(|_| ParseError::InvalidSampleRate)?;
    if !(rate > 0.0 && rate <= 1.0) {
        return Err(ParseError::InvalidSampleRate);
    }
    Ok(rate)
}

/// One parsed metric observation extracted from a statsd-format line.
///
/// # Submission Protocol
///
/// ```text
/// <name>:<value>|<type>[|@<sample_rate>][|#<tag_key>=<tag_value>,<tag>]
/// ```
///
/// The `|@` and `|#` components may appear in either order. An example submission looks like
/// this:
///
/// ```text
/// endpoint.hits:1|c|@0.5|#route=user_index,env=prod
/// ```
///
/// A datagram constructed by [`parse`](Self::parse) is fully validated; downstream consumers
/// need no further checks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Datagram {
    /// The name of the metric.
    ///
    /// Names must be non-empty and contain none of the protocol delimiters `:`, `|`, `#` or
    /// newlines.
    pub name: String,

    /// The value and type of this observation.
    #[serde(flatten)]
    pub value: DatagramValue,

    /// The probability with which the sender sampled this observation, in `(0, 1]`.
    ///
    /// Defaults to `1.0`. Counter and timer contributions are scaled by the inverse rate to
    /// estimate the true rate. Whether a rate on gauges and sets is ignored or rejected is a
    /// registry policy, not a parser concern.
    pub sample_rate: f64,

    /// A list of tags adding dimensions to the metric for aggregation.
    ///
    /// Tags are preceded with a hash `#` and specified in a comma (`,`) separated list of
    /// `key=value` entries. Keys are unique within a record; the map keeps them sorted so that
    /// key equality is independent of submission order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Datagram {
    /// Parses a statsd-compatible line.
    fn parse_str(string: &str) -> Result<Self, ParseError> {
        let mut components = string.split('|');

        let name_value = components.next().ok_or(ParseError::MalformedName)?;
        let (name, value_str) = name_value
            .split_once(':')
            .ok_or(ParseError::MalformedName)?;

        if name.is_empty() || name.contains(['#', '\n']) {
            return Err(ParseError::MalformedName);
        }

        let ty: MetricType = components.next().unwrap_or_default().parse()?;
        let value = DatagramValue::parse(value_str, ty)?;

        let mut datagram = Datagram {
            name: name.to_owned(),
            value,
            sample_rate: 1.0,
            tags: Default::default(),
        };

        for component in components {
            match component.as_bytes().first() {
                Some(b'@') => {
                    datagram.sample_rate = parse_sample_rate(&component[1..])?;
                }
                Some(b'#') => {
                    datagram.tags = parse_tags(&component[1..]);
                }
                _ => (),
            }
        }

        Ok(datagram)
    }

    /// Parses a single datagram from the raw protocol.
    ///
    /// # Example
    ///
    /// ```
    /// use agent_metrics::Datagram;
    ///
    /// let datagram = Datagram::parse(b"endpoint.response_time:57|ms")
    ///     .expect("datagram should parse");
    /// ```
    pub fn parse(slice: &[u8]) -> Result<Self, ParseError> {
        let string = std::str::from_utf8(slice).map_err(|_| ParseError::MalformedName)?;
        Self::parse_str(string)
    }

    /// Parses a set of datagrams from a raw network buffer.
    ///
    /// Returns a parse result for each line in `slice`, ignoring empty lines. Both UNIX newlines
    /// (`\n`) and Windows newlines (`\r\n`) are supported.
    ///
    /// It is possible to continue consuming the iterator after `Err` is yielded; a malformed line
    /// never aborts the sequence.
    ///
    /// # Example
    ///
    /// ```
    /// use agent_metrics::Datagram;
    ///
    /// let data = b"endpoint.response_time:57|ms\nendpoint.hits:1|c\n";
    ///
    /// for result in Datagram::parse_all(data) {
    ///     let datagram = result.expect("datagram should parse");
    ///     println!("metric {}: {:?}", datagram.name, datagram.value);
    /// }
    /// ```
    pub fn parse_all(slice: &[u8]) -> ParseDatagrams<'_> {
        ParseDatagrams { slice }
    }

    /// Returns the metric type of this datagram.
    pub fn ty(&self) -> MetricType {
        self.value.ty()
    }

    /// Returns the value of the specified tag if it exists.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(|s| s.as_str())
    }
}

impl fmt::Display for Datagram {
    /// Re-serializes the datagram into the submission protocol.
    ///
    /// The output preserves the semantic fields, not the original byte layout: tags are emitted
    /// in sorted order and a sample rate of `1.0` is omitted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}|{}", self.name, self.value, self.ty())?;

        if self.sample_rate != 1.0 {
            write!(f, "|@{}", self.sample_rate)?;
        }

        if !self.tags.is_empty() {
            f.write_str("|#")?;
            for (index, (key, value)) in self.tags.iter().enumerate() {
                if index > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{key}={value}")?;
            }
        }

        Ok(())
    }
}

/// Iterator over parsed datagrams returned from [`Datagram::parse_all`].
#[derive(Clone, Debug, Default)]
pub struct ParseDatagrams<'a> {
    slice: &'a [u8],
}

impl Iterator for ParseDatagrams<'_> {
    type Item = Result<Datagram, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut split = self.slice.splitn(2, |&b| b == b'\n');
            let current = split.next()?;
            self.slice = split.next().unwrap_or_default();

            let string = match std::str::from_utf8(current) {
                Ok(string) => string.strip_suffix('\r').unwrap_or(string),
                Err(_) => return Some(Err(ParseError::MalformedName)),
            };

            if !string.is_empty() {
                return Some(Datagram::parse_str(string));
            }
        }
    }
}

impl FusedIterator for ParseDatagrams<'_> {}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_parse_garbage() {
        let result = Datagram::parse(b"x23-408j17z4232@#34d");
        assert_eq!(result, Err(ParseError::MalformedName));
    }

    #[test]
    fn test_parse_counter() {
        let datagram = Datagram::parse(b"page.views:1|c").unwrap();
        insta::assert_debug_snapshot!(datagram, @r###"
        Datagram {
            name: "page.views",
            value: Counter(
                SignedValue {
                    value: 1.0,
                    sign: None,
                },
            ),
            sample_rate: 1.0,
            tags: {},
        }
        "###);
    }

    #[test]
    fn test_parse_counter_signed() {
        let datagram = Datagram::parse(b"page.views:-3|c").unwrap();
        assert_eq!(
            datagram.value,
            DatagramValue::Counter(SignedValue {
                value: -3.0,
                sign: Sign::Minus,
            })
        );
    }

    #[test]
    fn test_parse_counter_invalid_value() {
        let result = Datagram::parse(b"bad:notanumber|c");
        assert_eq!(result, Err(ParseError::InvalidValue));
    }

    #[test]
    fn test_parse_gauge_absolute() {
        let datagram = Datagram::parse(b"cache.size:42|g").unwrap();
        assert_eq!(
            datagram.value,
            DatagramValue::Gauge(SignedValue {
                value: 42.0,
                sign: Sign::None,
            })
        );
    }

    #[test]
    fn test_parse_gauge_delta() {
        let datagram = Datagram::parse(b"cache.size:+5|g").unwrap();
        assert_eq!(
            datagram.value,
            DatagramValue::Gauge(SignedValue {
                value: 5.0,
                sign: Sign::Plus,
            })
        );
    }

    #[test]
    fn test_parse_gauge_negative_zero() {
        // `-0` must remain distinguishable from an unsigned `0`.
        let datagram = Datagram::parse(b"cache.size:-0|g").unwrap();
        let DatagramValue::Gauge(signed) = datagram.value else {
            panic!("expected gauge");
        };
        assert_eq!(signed.sign, Sign::Minus);
        assert_eq!(signed.value, 0.0);
    }

    #[test]
    fn test_parse_timer() {
        let datagram = Datagram::parse(b"req.latency:120|ms").unwrap();
        assert_eq!(datagram.value, DatagramValue::Timer(120.0));
    }

    #[test]
    fn test_parse_histogram_alias() {
        let datagram = Datagram::parse(b"req.latency:17.5|h").unwrap();
        assert_eq!(datagram.value, DatagramValue::Timer(17.5));
    }

    #[test]
    fn test_parse_timer_negative() {
        let result = Datagram::parse(b"req.latency:-1|ms");
        assert_eq!(result, Err(ParseError::InvalidValue));
    }

    #[test]
    fn test_parse_set_string() {
        let datagram = Datagram::parse(b"uniques:abc|s").unwrap();
        assert_eq!(datagram.value, DatagramValue::Set(hash_set_value("abc")));
    }

    #[test]
    fn test_parse_set_integer() {
        let datagram = Datagram::parse(b"uniques:4267882815|s").unwrap();
        assert_eq!(datagram.value, DatagramValue::Set(4267882815));
    }

    #[test]
    fn test_parse_unknown_type() {
        assert_eq!(Datagram::parse(b"foo:1|x"), Err(ParseError::UnknownType));
        assert_eq!(Datagram::parse(b"foo:1"), Err(ParseError::UnknownType));
    }

    #[test]
    fn test_parse_empty_name() {
        assert_eq!(Datagram::parse(b":42|c"), Err(ParseError::MalformedName));
    }

    #[test]
    fn test_parse_sample_rate() {
        let datagram = Datagram::parse(b"req.latency:120|ms|@0.5").unwrap();
        assert_eq!(datagram.sample_rate, 0.5);
    }

    #[test]
    fn test_parse_sample_rate_out_of_range() {
        for payload in [
            "req.latency:120|ms|@0".as_bytes(),
            b"req.latency:120|ms|@1.5",
            b"req.latency:120|ms|@-0.5",
            b"req.latency:120|ms|@nope",
        ] {
            assert_eq!(Datagram::parse(payload), Err(ParseError::InvalidSampleRate));
        }
    }

    #[test]
    fn test_parse_tags() {
        let datagram = Datagram::parse(b"endpoint.hits:1|c|#route=user_index,env=prod").unwrap();
        insta::assert_debug_snapshot!(datagram.tags, @r###"
        {
            "env": "prod",
            "route": "user_index",
        }
        "###);
    }

    #[test]
    fn test_parse_tags_malformed_entries_skipped() {
        let datagram = Datagram::parse(b"endpoint.hits:1|c|#broken,=novalue,env=prod").unwrap();
        assert_eq!(datagram.tags.len(), 1);
        assert_eq!(datagram.tag("env"), Some("prod"));
    }

    #[test]
    fn test_parse_tags_duplicate_key_last_wins() {
        let datagram = Datagram::parse(b"endpoint.hits:1|c|#env=prod,env=staging").unwrap();
        assert_eq!(datagram.tag("env"), Some("staging"));
    }

    #[test]
    fn test_parse_components_any_order() {
        let datagram = Datagram::parse(b"endpoint.hits:1|c|#env=prod|@0.1").unwrap();
        assert_eq!(datagram.sample_rate, 0.1);
        assert_eq!(datagram.tag("env"), Some("prod"));
    }

    #[test]
    fn test_parse_all() {
        let buffer = b"page.views:1|c\ncache.size:42|g\nreq.latency:120|ms|@0.5\nuniques:abc|s\n";
        let datagrams: Vec<Datagram> = Datagram::parse_all(buffer)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(datagrams.len(), 4);
    }

    #[test]
    fn test_parse_all_crlf() {
        let count = Datagram::parse_all(b"foo:42|c\r\nbar:17|c").count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_parse_all_empty_lines() {
        let count = Datagram::parse_all(b"foo:42|c\n\n\nbar:17|c\n").count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_parse_all_keeps_valid_lines_in_order() {
        let buffer = b"ok.one:1|c\nbad:notanumber|c\nok.two:2|c\nworse\nok.three:3|c";
        let mut names = Vec::new();
        let mut errors = Vec::new();

        for result in Datagram::parse_all(buffer) {
            match result {
                Ok(datagram) => names.push(datagram.name),
                Err(error) => errors.push(error),
            }
        }

        assert_eq!(names, ["ok.one", "ok.two", "ok.three"]);
        assert_eq!(errors, [ParseError::InvalidValue, ParseError::MalformedName]);
    }

    #[test]
    fn test_display_roundtrip() {
        let inputs: &[&[u8]] = &[
            b"page.views:1|c",
            b"page.views:+3|c",
            b"cache.size:-7.5|g",
            b"req.latency:120|ms|@0.5",
            b"uniques:4267882815|s",
            b"endpoint.hits:1|c|@0.25|#env=prod,route=user_index",
        ];

        for input in inputs {
            let datagram = Datagram::parse(input).unwrap();
            let serialized = datagram.to_string();
            let reparsed = Datagram::parse(serialized.as_bytes()).unwrap();
            assert_eq!(datagram, reparsed);
        }
    }

    #[test]
    fn test_serialize_json() {
        let datagram = Datagram::parse(b"endpoint.hits:1|c|#env=prod").unwrap();
        let json = serde_json::to_string(&datagram).unwrap();
        assert_eq!(
            json,
            r#"{"name":"endpoint.hits","type":"c","value":{"value":1.0,"sign":"none"},"sample_rate":1.0,"tags":{"env":"prod"}}"#
        );
    }
}
