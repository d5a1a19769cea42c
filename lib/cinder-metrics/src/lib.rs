//! Internal telemetry helpers.
//!
//! Components report their own health through the [`metrics`] facade. [`MetricsBuilder`] keeps the tagging of those
//! metrics consistent: every metric registered through a builder carries the builder's default tags.
#![deny(warnings)]
#![deny(missing_docs)]

mod builder;
pub use self::builder::{MetricTag, MetricsBuilder};
