use std::fmt;

/// Metric type.
///
/// Describes how a backend should interpret successive values of the same metric. The Carbon wire format carries no
/// type information, so this tag only matters to components that care about it before the datapoint is rendered.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum MetricType {
    /// The latest value of a quantity.
    #[default]
    Gauge,

    /// A delta: the amount a quantity changed by since the previous report.
    Counter,

    /// A value drawn from a fixed set of states.
    Enum,

    /// A monotonically increasing running total.
    CumulativeCounter,
}

impl MetricType {
    /// Returns the name of the metric type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
            Self::Enum => "enum",
            Self::CumulativeCounter => "cumulative_counter",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
