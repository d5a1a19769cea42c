//! Relay components.
//!
//! Sources accept datapoints from the outside world, and forwarders ship them to a backend. The two meet at a bounded
//! mailbox: a source is handed the sending half of a forwarder's inbound channel.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod forwarders;
pub mod sources;

mod stats;
pub use self::stats::Stats;
