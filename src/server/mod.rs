//! The *server* module is the network side of the daemon:
//!
//! *  `transport` - the length-prefixed frames requests and replies
//! travel in.
//! *  `server` - the listener that admits clients and runs a session
//! for each.
//!
pub mod transport;
pub mod server;
pub use self::server::server::*;
