//! Wire codecs.

pub mod carbon;
