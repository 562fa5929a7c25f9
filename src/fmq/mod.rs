//! The *fmq* module holds the queue side of the server:
//!
//! *  `store` - the `FmqStore` trait a session drives, and the
//! value types that cross it (open modes, seek positions, messages).
//! *  `filequeue` - `FileQueue`, a file backed ring of message slots
//! that implements `FmqStore`.
//! *  `lock` - the lock file that serializes handles on the same queue.
//!
pub mod store;
pub use self::store::store::*;
pub mod lock;
pub mod filequeue;
pub use self::filequeue::filequeue::*;
