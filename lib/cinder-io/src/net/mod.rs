//! Network primitives.

mod addr;
pub use self::addr::ListenAddress;

pub mod listener;
pub use self::listener::{Listener, ListenerError};
