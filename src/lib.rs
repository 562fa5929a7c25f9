//!  DsFmqServer gives network clients access to File Message Queues
//! (FMQs).  An FMQ is a persistent, append-only queue of typed
//! messages kept in a pair of files: a table of message slots and a
//! data ring the slots point into.  Any number of readers can follow a
//! queue, each at its own position, while writers append to it.  Old
//! messages are overwritten once the slots or the data ring run out.
//!
//! The server lets clients that cannot (or should not) open the queue
//! files themselves read and write queues over TCP.  Each client
//! connection gets its own session and its own queue handle; sessions
//! share nothing but the queue files.
//!
//! ##  Running the server:
//!
//!   The server takes the following options:
//!
//! *   --port - TCP port to listen on, default 5520.
//! *   --instance - Instance name reported to IS_ALIVE.
//! *   --cmax - Maximum number of simultaneous clients.  The
//! DS_SERVER_MAX_CLIENTS environment variable overrides it.
//! *   --qmax - Exit after this many seconds with no clients; 0 (the
//! default) never exits.
//! *   --data-dir - Directory relative queue URLs are resolved in.
//! Defaults to $RAP_DATA_DIR, else the current directory.
//! *   --max-read-msgs, --max-read-bytes - READ batch caps.
//! *   --max-slots, --max-buf-size - Largest queue a client INIT may
//! create.
//! *   --no-threads - Serve one client at a time on the main thread.
//! *   --debug, --verbose - More logging.
//! *   --log-file - Log here rather than to stderr.
//!
//! ## Wire protocol
//!
//! Everything is big-endian.  A connection carries frames:
//!
//! ```text
//! tag i32 | seq i32 | len u32 | payload[len]
//! ```
//!
//! The tag is DS_FMQ_MESSAGE for queue requests and replies, or
//! DS_SERVER_STATUS_MESSAGE for server status commands.  Replies echo
//! the sequence number of their request.
//!
//! A payload is an envelope: a 24 byte header
//! `type | sub_type | mode | flags | status | n_parts` followed by
//! `n_parts` parts, each `part_id | len | bytes`.
//!
//! The protocol is strictly request/reply.  Every request is answered
//! with exactly one reply of the same type, status 0 on success or -1
//! with an ERR_STRING part on failure.  The only exception is CLOSE,
//! which is never answered.
//!
//! ### INIT
//!
//! Opens the queue named by the URL part with the parameters in the
//! INIT_INFO part.  Must come before anything else, and only once per
//! connection.  URLs look like `fmq://host:port/abs/path`,
//! `fmq:///abs/path` or `fmqp://host::relative/path`.
//!
//! ### SET_COMPRESSION_METHOD, SET_BLOCKING_WRITE, SET_SINGLE_WRITER, SET_REG_WITH_DMAP
//!
//! Handle settings.  These always succeed once the queue is open.
//!
//! ### SEEK, SEEK_TO_ID
//!
//! Move the read position to START, END, LAST or BACK (sub_type) or
//! to just before the message with a given id.
//!
//! ### READ
//!
//! Returns the next batch of messages whose type matches sub_type
//! (any type if sub_type is not positive), each in a READ_MSG part.
//! An empty batch means there is nothing new.
//!
//! ### WRITE
//!
//! Carries pairs of MSG_INFO and MSG_DATA parts.  Messages are
//! written in order; the first failure ends the request and is
//! reported, messages written before it stay written.
//!
//! ### CLOSE
//!
//! Closes the queue and ends the connection.  No reply.
//!
//! ### Status commands
//!
//! IS_ALIVE answers with the server pid and instance, GET_NUM_CLIENTS
//! with the number of connected clients, SHUTDOWN acknowledges and
//! stops the server.  A client connecting when the server is full gets
//! an unsolicited SERVICE_DENIED status reply and is disconnected.
//!
pub mod fmq;
pub use fmq::*;
pub mod protocol;
pub use protocol::*;
pub mod session;
pub mod server;
pub mod client;
pub use client::client::*;
