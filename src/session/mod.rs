//! Per connection request handling: the `session` state machine and
//! the READ `batcher` it uses.
//!
pub mod batcher;
pub use self::batcher::batcher::*;
pub mod session;
pub use self::session::session::*;
