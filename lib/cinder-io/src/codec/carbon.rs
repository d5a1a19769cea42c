//! Carbon plaintext protocol.
//!
//! Each datapoint is a single ASCII line of three whitespace-separated fields, terminated by a newline:
//!
//! ```text
//! <metric-path> <value> <unix-timestamp>\n
//! ```
use std::{
    borrow::Cow,
    fmt::Write as _,
    time::{Duration, SystemTime},
};

use cinder_event::{Datapoint, Measurement, MetricType, Value};
use nom::{
    bytes::complete::take_till1, character::complete::space1, combinator::all_consuming, multi::separated_list1,
    IResult, Parser as _,
};
use snafu::Snafu;

/// A Carbon line parsing error.
#[derive(Debug, Eq, PartialEq, Snafu)]
#[snafu(context(suffix(false)))]
pub enum CarbonParseError {
    /// The line was empty, or contained only whitespace.
    #[snafu(display("line is empty"))]
    Empty,

    /// The line did not have exactly three fields.
    #[snafu(display("expected 3 fields (metric, value, timestamp), found {}", fields))]
    FieldCount {
        /// Number of fields found.
        fields: usize,
    },

    /// The value field was not numeric.
    #[snafu(display("invalid value '{}'", value))]
    InvalidValue {
        /// Raw value field.
        value: String,
    },

    /// The timestamp field was not a non-negative number of seconds.
    #[snafu(display("invalid timestamp '{}'", timestamp))]
    InvalidTimestamp {
        /// Raw timestamp field.
        timestamp: String,
    },
}

/// Encodes a datapoint as a Carbon line.
///
/// Datapoints carrying a pre-rendered line are returned verbatim, and are responsible for their own framing. All other
/// datapoints are rendered as `<metric> <value> <seconds>\n`.
pub fn encode_line(datapoint: &Datapoint) -> Cow<'_, str> {
    match datapoint.carbon_line() {
        Some(line) => Cow::Borrowed(line),
        None => {
            let mut buf = String::new();
            write_measurement(datapoint.measurement(), &mut buf);
            Cow::Owned(buf)
        }
    }
}

/// Encodes a datapoint as a Carbon line, appending it to `buf`.
pub fn write_line(datapoint: &Datapoint, buf: &mut String) {
    match datapoint.carbon_line() {
        Some(line) => buf.push_str(line),
        None => write_measurement(datapoint.measurement(), buf),
    }
}

fn write_measurement(measurement: &Measurement, buf: &mut String) {
    // Writing into a `String` cannot fail.
    let _ = writeln!(
        buf,
        "{} {} {}",
        measurement.metric(),
        measurement.value(),
        measurement.unix_seconds()
    );
}

/// Parses a single Carbon line into a datapoint.
///
/// Surrounding whitespace, including the trailing newline, is ignored. Integer values are kept as integers, anything
/// else numeric becomes a float. Timestamps may carry a fractional part, which is kept to millisecond precision.
/// Decoded datapoints are gauges with no dimensions, as the protocol carries neither.
///
/// # Errors
///
/// If the line does not consist of exactly three fields, or the value or timestamp are not numeric, an error is
/// returned.
pub fn parse_line(line: &str) -> Result<Datapoint, CarbonParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(CarbonParseError::Empty);
    }

    let fields = split_fields(line)?;
    let [metric, raw_value, raw_timestamp] = fields[..] else {
        return Err(CarbonParseError::FieldCount { fields: fields.len() });
    };

    let value = parse_value(raw_value)?;
    let timestamp = parse_timestamp(raw_timestamp)?;

    Ok(Datapoint::Standard(Measurement::new(
        metric,
        value,
        MetricType::Gauge,
        timestamp,
    )))
}

fn split_fields(line: &str) -> Result<Vec<&str>, CarbonParseError> {
    let field = take_till1(|c: char| c.is_ascii_whitespace());
    let result: IResult<&str, Vec<&str>> = all_consuming(separated_list1(space1, field)).parse(line);
    match result {
        Ok((_, fields)) => Ok(fields),
        // Only non-space whitespace, such as an embedded newline, can stop the parser early.
        Err(_) => Err(CarbonParseError::FieldCount {
            fields: line.split_ascii_whitespace().count(),
        }),
    }
}

fn parse_value(raw: &str) -> Result<Value, CarbonParseError> {
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Value::Int(i));
    }

    match raw.parse::<f64>() {
        Ok(f) => Ok(Value::Float(f)),
        Err(_) => Err(CarbonParseError::InvalidValue { value: raw.to_string() }),
    }
}

fn parse_timestamp(raw: &str) -> Result<SystemTime, CarbonParseError> {
    let since_epoch = match raw.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => match raw.parse::<f64>() {
            Ok(secs) if secs >= 0.0 => Duration::try_from_secs_f64(secs).ok().map(truncate_to_millis),
            _ => None,
        },
    };

    // Timestamps past what the platform clock can represent are rejected, not clamped.
    since_epoch
        .and_then(|since_epoch| SystemTime::UNIX_EPOCH.checked_add(since_epoch))
        .ok_or_else(|| CarbonParseError::InvalidTimestamp {
            timestamp: raw.to_string(),
        })
}

fn truncate_to_millis(duration: Duration) -> Duration {
    Duration::new(duration.as_secs(), duration.subsec_millis() * 1_000_000)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn encode_standard() {
        let dp = Datapoint::from(Measurement::new("metric", 2i64, MetricType::Gauge, at(1_700_000_000)));
        assert_eq!(encode_line(&dp), "metric 2 1700000000\n");

        let dp = Datapoint::from(Measurement::new("a.b.c", 0.25, MetricType::Counter, at(12)));
        assert_eq!(encode_line(&dp), "a.b.c 0.25 12\n");
    }

    #[test]
    fn encode_pre_rendered_is_verbatim() {
        let measurement = Measurement::new("metric", 2i64, MetricType::Gauge, at(5));
        let dp = Datapoint::pre_rendered(measurement, "lineitem 3 4");
        assert_eq!(encode_line(&dp), "lineitem 3 4");

        let mut buf = String::from("prefix\n");
        write_line(&dp, &mut buf);
        assert_eq!(buf, "prefix\nlineitem 3 4");
    }

    #[test]
    fn encode_pre_epoch_timestamp_as_zero() {
        let ts = SystemTime::UNIX_EPOCH - Duration::from_secs(30);
        let dp = Datapoint::from(Measurement::new("metric", 1i64, MetricType::Gauge, ts));
        assert_eq!(encode_line(&dp), "metric 1 0\n");
    }

    #[test]
    fn parse_basic() {
        let dp = parse_line("lineitem 3 4\n").unwrap();
        assert_eq!(dp.metric(), "lineitem");
        assert_eq!(dp.value().wire_value(), "3");
        assert_eq!(dp.timestamp(), at(4));
        assert_eq!(dp.metric_type(), MetricType::Gauge);
        assert!(dp.dimensions().is_empty());
    }

    #[test]
    fn parse_float_value_and_fractional_timestamp() {
        let dp = parse_line("  cpu.idle\t98.5   1700000000.250\r\n").unwrap();
        assert_eq!(dp.value(), &Value::Float(98.5));
        assert_eq!(dp.timestamp(), at(1_700_000_000) + Duration::from_millis(250));

        let dp = parse_line("metric 1 12.3459").unwrap();
        assert_eq!(dp.timestamp(), at(12) + Duration::from_millis(345));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(parse_line(""), Err(CarbonParseError::Empty));
        assert_eq!(parse_line(" \n"), Err(CarbonParseError::Empty));
        assert_eq!(parse_line("metric 1"), Err(CarbonParseError::FieldCount { fields: 2 }));
        assert_eq!(parse_line("metric 1 2 3"), Err(CarbonParseError::FieldCount { fields: 4 }));
        assert_eq!(
            parse_line("metric one 2"),
            Err(CarbonParseError::InvalidValue { value: "one".into() })
        );
        assert_eq!(
            parse_line("metric 1 -5"),
            Err(CarbonParseError::InvalidTimestamp { timestamp: "-5".into() })
        );
        assert_eq!(
            parse_line("metric 1 18446744073709551615"),
            Err(CarbonParseError::InvalidTimestamp {
                timestamp: "18446744073709551615".into()
            })
        );
        assert_eq!(
            parse_line("metric 1 1e300"),
            Err(CarbonParseError::InvalidTimestamp { timestamp: "1e300".into() })
        );
        assert_eq!(
            parse_line("metric 1 NaN"),
            Err(CarbonParseError::InvalidTimestamp { timestamp: "NaN".into() })
        );
        assert_eq!(
            parse_line("metric 1 soon"),
            Err(CarbonParseError::InvalidTimestamp {
                timestamp: "soon".into()
            })
        );
    }

    proptest! {
        #[test]
        fn decoded_line_preserves_name_and_seconds(
            metric in "[a-zA-Z0-9_.-]{1,40}",
            value in any::<i64>(),
            secs in 0u64..4_000_000_000,
        ) {
            let dp = Datapoint::from(Measurement::new(metric.clone(), value, MetricType::Gauge, at(secs)));
            let decoded = parse_line(&encode_line(&dp)).unwrap();

            prop_assert_eq!(decoded.metric(), metric.as_str());
            prop_assert_eq!(decoded.timestamp(), at(secs));
            prop_assert_eq!(decoded.value(), &Value::Int(value));
        }
    }
}
