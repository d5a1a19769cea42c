//! Core datapoint type for Cinder.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod datapoint;
pub use self::datapoint::{Datapoint, Dimensions, Measurement, MetricType, Value};
