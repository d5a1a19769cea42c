//! Networking and wire codecs.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod codec;
pub mod net;
