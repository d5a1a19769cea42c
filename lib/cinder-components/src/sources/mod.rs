//! Sources.

pub mod carbon;
