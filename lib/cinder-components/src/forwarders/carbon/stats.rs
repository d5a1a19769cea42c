use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use cinder_metrics::MetricsBuilder;
use metrics::Counter;

use super::connection::ConnectionError;
use crate::Stats;

pub(super) const DATAPOINTS_FORWARDED: &str = "datapoints_forwarded";
pub(super) const BYTES_WRITTEN: &str = "bytes_written";
pub(super) const DIAL_FAILURES: &str = "dial_failures";
pub(super) const WRITE_FAILURES: &str = "write_failures";
pub(super) const BACKOFF_DROPS: &str = "backoff_drops";

/// Internal telemetry, mirrored into the global metrics registry.
struct Telemetry {
    events_sent: Counter,
    bytes_sent: Counter,
    dial_errors: Counter,
    write_errors: Counter,
    events_dropped_dial: Counter,
    events_dropped_write: Counter,
    events_dropped_backoff: Counter,
}

impl Telemetry {
    fn from_builder(builder: &MetricsBuilder) -> Self {
        Self {
            events_sent: builder.register_debug_counter("component_events_sent_total"),
            bytes_sent: builder.register_debug_counter("component_bytes_sent_total"),
            dial_errors: builder.register_debug_counter_with_tags("component_errors_total", ["error_type:dial"]),
            write_errors: builder.register_debug_counter_with_tags("component_errors_total", ["error_type:write"]),
            events_dropped_dial: builder
                .register_debug_counter_with_tags("component_events_dropped_total", ["drop_reason:dial_failure"]),
            events_dropped_write: builder
                .register_debug_counter_with_tags("component_events_dropped_total", ["drop_reason:write_failure"]),
            events_dropped_backoff: builder
                .register_debug_counter_with_tags("component_events_dropped_total", ["drop_reason:backoff"]),
        }
    }
}

/// Counters for a single forwarder.
///
/// Only the forwarder's processing task updates these, but any number of readers may take snapshots concurrently.
pub(super) struct ForwarderStats {
    datapoints_forwarded: AtomicU64,
    bytes_written: AtomicU64,
    dial_failures: AtomicU64,
    write_failures: AtomicU64,
    backoff_drops: AtomicU64,
    telemetry: Telemetry,
}

impl ForwarderStats {
    pub fn new(name: &str) -> Self {
        let builder = MetricsBuilder::for_component(name).add_default_tag("component_type:carbon");

        Self {
            datapoints_forwarded: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            dial_failures: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            backoff_drops: AtomicU64::new(0),
            telemetry: Telemetry::from_builder(&builder),
        }
    }

    pub fn track_forwarded(&self, bytes: usize) {
        self.datapoints_forwarded.fetch_add(1, Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Relaxed);
        self.telemetry.events_sent.increment(1);
        self.telemetry.bytes_sent.increment(bytes as u64);
    }

    /// Tracks a datapoint dropped because of the given error.
    pub fn track_failure(&self, error: &ConnectionError) {
        match error {
            ConnectionError::BackingOff { .. } => {
                self.backoff_drops.fetch_add(1, Relaxed);
                self.telemetry.events_dropped_backoff.increment(1);
            }
            e if e.is_dial_error() => {
                self.dial_failures.fetch_add(1, Relaxed);
                self.telemetry.dial_errors.increment(1);
                self.telemetry.events_dropped_dial.increment(1);
            }
            _ => {
                self.write_failures.fetch_add(1, Relaxed);
                self.telemetry.write_errors.increment(1);
                self.telemetry.events_dropped_write.increment(1);
            }
        }
    }

    pub fn snapshot(&self) -> Stats {
        Stats::from_counters(vec![
            (DATAPOINTS_FORWARDED, self.datapoints_forwarded.load(Relaxed)),
            (BYTES_WRITTEN, self.bytes_written.load(Relaxed)),
            (DIAL_FAILURES, self.dial_failures.load(Relaxed)),
            (WRITE_FAILURES, self.write_failures.load(Relaxed)),
            (BACKOFF_DROPS, self.backoff_drops.load(Relaxed)),
        ])
    }
}
