pub mod store {
    use std::path::PathBuf;
    use thiserror::Error;

    ///
    /// Type filter value that accepts every message type.
    /// Any non-positive filter is treated the same way.
    ///
    pub const ANY_TYPE: i32 = -1;

    ///
    /// Returns true if a message of type `msg_type` passes the
    /// read filter `requested_type`.
    ///
    pub fn type_matches(requested_type: i32, msg_type: i32) -> bool {
        requested_type <= 0 || requested_type == msg_type
    }

    /// Failures reported by a queue store.  The Display text of each
    /// variant is what the server hands back to its clients as the
    /// reply error string.
    ///
    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum StoreError {
        #[error("queue not open, must call init first")]
        NotOpen,
        #[error("I/O error on {path}: {reason}")]
        Io { path: String, reason: String },
        #[error("queue {path} is corrupt: {reason}")]
        Corrupt { path: String, reason: String },
        #[error("queue {0} does not exist")]
        NoSuchQueue(String),
        #[error("cannot find slot for id: {0}")]
        NoSuchId(i32),
        #[error("queue {0} was opened read-only")]
        ReadOnly(String),
        #[error("message of {len} bytes does not fit in buffer of {buf_size} bytes")]
        TooLarge { len: usize, buf_size: usize },
        #[error("bad queue geometry: {0}")]
        Geometry(String),
        #[error("compression error: {0}")]
        Compression(String),
        #[error("could not lock queue: {0}")]
        Lock(String),
        #[error("{0}")]
        Other(String),
    }

    ///
    /// How a queue is opened by `init`:
    ///
    /// *   Create - create the queue, clobbering any existing queue.
    /// *   ReadWrite - open an existing queue, creating it if needed.
    /// *   ReadOnly - open an existing queue for reading only.
    /// *   BlockingReadOnly / BlockingReadWrite - as above but wait
    /// for the queue to appear rather than failing.
    ///
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum OpenMode {
        Create,
        ReadWrite,
        ReadOnly,
        BlockingReadOnly,
        BlockingReadWrite,
    }

    impl OpenMode {
        pub fn from_code(code: i32) -> Option<OpenMode> {
            match code {
                0 => Some(OpenMode::Create),
                1 => Some(OpenMode::ReadWrite),
                2 => Some(OpenMode::ReadOnly),
                3 => Some(OpenMode::BlockingReadOnly),
                4 => Some(OpenMode::BlockingReadWrite),
                _ => None,
            }
        }
        pub fn code(&self) -> i32 {
            match self {
                OpenMode::Create => 0,
                OpenMode::ReadWrite => 1,
                OpenMode::ReadOnly => 2,
                OpenMode::BlockingReadOnly => 3,
                OpenMode::BlockingReadWrite => 4,
            }
        }
        pub fn is_writable(&self) -> bool {
            match self {
                OpenMode::ReadOnly | OpenMode::BlockingReadOnly => false,
                _ => true,
            }
        }
        pub fn is_blocking(&self) -> bool {
            match self {
                OpenMode::BlockingReadOnly | OpenMode::BlockingReadWrite => true,
                _ => false,
            }
        }
    }

    /// Where the read position lands after the queue is opened.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum OpenPosition {
        Start,
        End,
        Last,
    }

    impl OpenPosition {
        pub fn from_code(code: i32) -> Option<OpenPosition> {
            match code {
                0 => Some(OpenPosition::Start),
                1 => Some(OpenPosition::End),
                2 => Some(OpenPosition::Last),
                _ => None,
            }
        }
        pub fn code(&self) -> i32 {
            match self {
                OpenPosition::Start => 0,
                OpenPosition::End => 1,
                OpenPosition::Last => 2,
            }
        }
    }

    ///
    /// Seek targets:
    ///
    /// *   Start - before the oldest message.
    /// *   End - after the youngest message.
    /// *   Last - ready to read the youngest message.
    /// *   Back - back up by one message.
    ///
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SeekPosition {
        Start,
        End,
        Last,
        Back,
    }

    impl SeekPosition {
        pub fn from_code(code: i32) -> Option<SeekPosition> {
            match code {
                0 => Some(SeekPosition::Start),
                1 => Some(SeekPosition::End),
                2 => Some(SeekPosition::Last),
                3 => Some(SeekPosition::Back),
                _ => None,
            }
        }
        pub fn code(&self) -> i32 {
            match self {
                SeekPosition::Start => 0,
                SeekPosition::End => 1,
                SeekPosition::Last => 2,
                SeekPosition::Back => 3,
            }
        }
    }

    impl From<OpenPosition> for SeekPosition {
        fn from(position: OpenPosition) -> SeekPosition {
            match position {
                OpenPosition::Start => SeekPosition::Start,
                OpenPosition::End => SeekPosition::End,
                OpenPosition::Last => SeekPosition::Last,
            }
        }
    }

    /// Compression applied by the store to messages it writes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum CompressionMethod {
        None,
        Gzip,
    }

    impl CompressionMethod {
        /// Anything other than 0 selects gzip.
        pub fn from_code(code: i32) -> CompressionMethod {
            if code == 0 {
                CompressionMethod::None
            } else {
                CompressionMethod::Gzip
            }
        }
        pub fn code(&self) -> i32 {
            match self {
                CompressionMethod::None => 0,
                CompressionMethod::Gzip => 1,
            }
        }
    }

    ///
    /// Everything `FmqStore::init` needs to open a queue.
    ///
    #[derive(Debug, Clone, PartialEq)]
    pub struct InitParams {
        pub path: PathBuf,
        pub proc_name: String,
        pub verbose: bool,
        pub open_mode: OpenMode,
        pub open_position: OpenPosition,
        pub compress: bool,
        pub num_slots: i32,
        pub buf_size: i32,
    }

    ///
    /// A message copied out of the queue.
    ///
    /// *   id - queue-assigned sequence id.
    /// *   time - unix seconds at which it was written.
    /// *   compressed - true if `data` is still gzip compressed (server mode).
    /// *   uncompressed_len - length of the message once inflated.
    ///
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct QueueMessage {
        pub id: i32,
        pub msg_type: i32,
        pub subtype: i32,
        pub time: i64,
        pub compressed: bool,
        pub uncompressed_len: i32,
        pub data: Vec<u8>,
    }

    impl QueueMessage {
        pub fn len(&self) -> usize {
            self.data.len()
        }
        pub fn is_empty(&self) -> bool {
            self.data.is_empty()
        }
    }

    ///
    /// The operations the server needs from a message queue.  A store
    /// is a single open handle: one reader position, one write stream.
    /// Handles on the same underlying queue coordinate among themselves
    /// (locking, single-writer mode), never through the caller.
    ///
    pub trait FmqStore: Send {
        fn init(&mut self, params: &InitParams) -> Result<(), StoreError>;

        /// Marks the handle as used by a server: reads hand back stored
        /// (possibly compressed) bytes instead of inflating them.
        fn set_server_mode(&mut self);
        fn set_compression_method(&mut self, method: CompressionMethod);
        fn set_blocking_write(&mut self);
        fn set_single_writer(&mut self);
        fn set_register_with_dmap(&mut self, enabled: bool, interval_secs: i32);

        fn seek(&mut self, position: SeekPosition) -> Result<(), StoreError>;
        fn seek_to_id(&mut self, id: i32) -> Result<(), StoreError>;

        /// Next message passing the type filter, or None if the reader
        /// has caught up with the writers.
        fn read_msg(&mut self, requested_type: i32) -> Result<Option<QueueMessage>, StoreError>;
        fn write_msg(&mut self, msg_type: i32, subtype: i32, data: &[u8]) -> Result<(), StoreError>;
        fn write_msg_pre_compressed(
            &mut self,
            msg_type: i32,
            subtype: i32,
            data: &[u8],
            uncompressed_len: i32,
        ) -> Result<(), StoreError>;

        fn close(&mut self) -> Result<(), StoreError>;

        /// Text of the most recent failure, empty if the last call succeeded.
        fn err_str(&self) -> String;
    }

    ///
    /// Makes a fresh, unopened store for each session.
    ///
    pub trait StoreFactory: Send + Sync {
        fn create(&self) -> Box<dyn FmqStore>;
    }

    impl<F> StoreFactory for F
    where
        F: Fn() -> Box<dyn FmqStore> + Send + Sync,
    {
        fn create(&self) -> Box<dyn FmqStore> {
            self()
        }
    }

    #[cfg(test)]
    mod store_test {
        use super::*;

        #[test]
        fn filter_non_positive_is_any() {
            assert!(type_matches(ANY_TYPE, 7));
            assert!(type_matches(0, 1));
            assert!(type_matches(3, 3));
            assert!(!type_matches(3, 4));
        }
        #[test]
        fn codes() {
            assert_eq!(Some(OpenMode::ReadOnly), OpenMode::from_code(2));
            assert_eq!(None, OpenMode::from_code(9));
            assert!(!OpenMode::BlockingReadOnly.is_writable());
            assert!(OpenMode::BlockingReadWrite.is_blocking());
            assert_eq!(Some(SeekPosition::Back), SeekPosition::from_code(3));
            assert_eq!(None, SeekPosition::from_code(-1));
            assert_eq!(CompressionMethod::Gzip, CompressionMethod::from_code(4));
            assert_eq!(CompressionMethod::None, CompressionMethod::from_code(0));
            assert_eq!(SeekPosition::Last, SeekPosition::from(OpenPosition::Last));
        }
        #[test]
        fn error_strings() {
            assert_eq!(
                "queue not open, must call init first",
                StoreError::NotOpen.to_string()
            );
            assert_eq!("cannot find slot for id: 12", StoreError::NoSuchId(12).to_string());
        }
    }
}
