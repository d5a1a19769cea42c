//! Forwarders.

pub mod carbon;
