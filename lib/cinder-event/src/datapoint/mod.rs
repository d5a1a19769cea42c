//! Datapoints.
use std::{
    collections::HashMap,
    fmt,
    time::{Duration, SystemTime},
};

mod kind;
pub use self::kind::MetricType;

mod value;
pub use self::value::Value;

/// Dimensions attached to a measurement.
///
/// Dimensions are unordered name/value pairs that further qualify the metric name, such as `host` or `region`.
pub type Dimensions = HashMap<String, String>;

/// A single measurement.
///
/// A measurement is the observation itself: what was measured (metric name and dimensions), the value that was
/// observed, how that value should be interpreted (the metric type), and when it was observed.
///
/// Timestamps are always absolute. Measurements created relative to "now" are resolved against the system clock at
/// construction time, so a `Measurement` never changes meaning after it is created.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    metric: String,
    dimensions: Dimensions,
    value: Value,
    metric_type: MetricType,
    timestamp: SystemTime,
}

impl Measurement {
    /// Creates a new `Measurement` with an absolute timestamp.
    pub fn new<M, V>(metric: M, value: V, metric_type: MetricType, timestamp: SystemTime) -> Self
    where
        M: Into<String>,
        V: Into<Value>,
    {
        Self {
            metric: metric.into(),
            dimensions: Dimensions::new(),
            value: value.into(),
            metric_type,
            timestamp,
        }
    }

    /// Creates a new `Measurement` timestamped relative to the current time.
    ///
    /// `offset_ms` is added to the current time, so a negative offset places the measurement in the past. An offset of
    /// zero timestamps the measurement "now".
    pub fn relative<M, V>(metric: M, value: V, metric_type: MetricType, offset_ms: i64) -> Self
    where
        M: Into<String>,
        V: Into<Value>,
    {
        let now = SystemTime::now();
        let offset = Duration::from_millis(offset_ms.unsigned_abs());
        let timestamp = if offset_ms >= 0 {
            now.checked_add(offset).unwrap_or(now)
        } else {
            now.checked_sub(offset).unwrap_or(SystemTime::UNIX_EPOCH)
        };

        Self::new(metric, value, metric_type, timestamp)
    }

    /// Creates a gauge measurement timestamped now.
    pub fn gauge<M, V>(metric: M, value: V) -> Self
    where
        M: Into<String>,
        V: Into<Value>,
    {
        Self::new(metric, value, MetricType::Gauge, SystemTime::now())
    }

    /// Sets the dimensions of the measurement.
    pub fn with_dimensions<I, K, V>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.dimensions = dimensions.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Gets the metric name.
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Gets a reference to the dimensions.
    pub fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    /// Gets a reference to the value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Gets the metric type.
    pub fn metric_type(&self) -> MetricType {
        self.metric_type
    }

    /// Gets the absolute timestamp.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Gets the timestamp as whole seconds since the Unix epoch.
    ///
    /// Timestamps before the epoch are reported as zero.
    pub fn unix_seconds(&self) -> u64 {
        self.timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A datapoint.
///
/// Most datapoints are plain measurements, and are rendered to the wire by whichever encoder handles them. Some
/// producers already hold the exact protocol line they want sent (for instance, a relay that received the line
/// verbatim), in which case the datapoint carries that line alongside the measurement and encoders use it unchanged.
#[derive(Clone, Debug, PartialEq)]
pub enum Datapoint {
    /// A measurement rendered by the encoder.
    Standard(Measurement),

    /// A measurement that supplies its own pre-rendered Carbon line.
    PreRendered {
        /// The underlying measurement.
        measurement: Measurement,

        /// The line to send, including any framing (such as the trailing newline).
        line: String,
    },
}

impl Datapoint {
    /// Creates a gauge datapoint timestamped now.
    pub fn gauge<M, V>(metric: M, value: V) -> Self
    where
        M: Into<String>,
        V: Into<Value>,
    {
        Self::Standard(Measurement::gauge(metric, value))
    }

    /// Creates a datapoint that renders to the given line instead of the default encoding.
    pub fn pre_rendered<L>(measurement: Measurement, line: L) -> Self
    where
        L: Into<String>,
    {
        Self::PreRendered {
            measurement,
            line: line.into(),
        }
    }

    /// Gets a reference to the underlying measurement.
    pub fn measurement(&self) -> &Measurement {
        match self {
            Self::Standard(measurement) => measurement,
            Self::PreRendered { measurement, .. } => measurement,
        }
    }

    /// Gets the metric name.
    pub fn metric(&self) -> &str {
        self.measurement().metric()
    }

    /// Gets a reference to the dimensions.
    pub fn dimensions(&self) -> &Dimensions {
        self.measurement().dimensions()
    }

    /// Gets a reference to the value.
    pub fn value(&self) -> &Value {
        self.measurement().value()
    }

    /// Gets the metric type.
    pub fn metric_type(&self) -> MetricType {
        self.measurement().metric_type()
    }

    /// Gets the absolute timestamp.
    pub fn timestamp(&self) -> SystemTime {
        self.measurement().timestamp()
    }

    /// Returns the pre-rendered Carbon line, if this datapoint carries one.
    pub fn carbon_line(&self) -> Option<&str> {
        match self {
            Self::Standard(_) => None,
            Self::PreRendered { line, .. } => Some(line),
        }
    }
}

impl From<Measurement> for Datapoint {
    fn from(measurement: Measurement) -> Self {
        Self::Standard(measurement)
    }
}

impl fmt::Display for Datapoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let measurement = self.measurement();
        write!(
            f,
            "{}[{} {} @ {}]",
            measurement.metric(),
            measurement.metric_type(),
            measurement.value(),
            measurement.unix_seconds()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_timestamps_resolve_at_construction() {
        let before = SystemTime::now();
        let measurement = Measurement::relative("metric", 2i64, MetricType::Gauge, 0);
        let after = SystemTime::now();

        assert!(measurement.timestamp() >= before);
        assert!(measurement.timestamp() <= after);

        let past = Measurement::relative("metric", 2i64, MetricType::Gauge, -60_000);
        assert!(past.timestamp() < before);
    }

    #[test]
    fn unix_seconds_truncates() {
        let ts = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_999);
        let measurement = Measurement::new("metric", 1i64, MetricType::Counter, ts);
        assert_eq!(measurement.unix_seconds(), 1_700_000_000);
    }

    #[test]
    fn carbon_line_capability() {
        let measurement = Measurement::gauge("metric", 2i64);
        let standard = Datapoint::from(measurement.clone());
        assert_eq!(standard.carbon_line(), None);

        let pre_rendered = Datapoint::pre_rendered(measurement, "lineitem 3 4");
        assert_eq!(pre_rendered.carbon_line(), Some("lineitem 3 4"));
        assert_eq!(pre_rendered.metric(), "metric");
    }

    #[test]
    fn dimensions() {
        let measurement = Measurement::gauge("cpu.idle", 98.5).with_dimensions([("host", "web01"), ("dc", "east")]);
        assert_eq!(measurement.dimensions().len(), 2);
        assert_eq!(measurement.dimensions().get("host").map(String::as_str), Some("web01"));
    }
}
