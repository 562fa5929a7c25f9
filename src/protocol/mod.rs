//! The *protocol* module holds everything that defines what travels
//! on the wire:
//!
//! *  `messages` - requests, replies and status commands as Rust values.
//! *  `framer` - the big-endian envelope codec for those values.
//! *  `url` - parsing of the queue URLs carried by INIT.
//!
pub mod messages;
pub use self::messages::messages::*;
pub mod framer;
pub mod url;
pub use self::url::url::*;
