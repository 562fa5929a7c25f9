pub mod messages {
    use crate::fmq::store::store::{
        CompressionMethod, OpenMode, OpenPosition, QueueMessage, SeekPosition,
    };
    use std::fmt;

    ///
    /// Discriminator carried in the envelope header of every queue
    /// request and mirrored in its reply.  `BadMessage` only appears in
    /// replies, for requests whose type could not be determined.
    ///
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum RequestType {
        BadMessage,
        Init,
        SetCompressionMethod,
        SetBlockingWrite,
        SetSingleWriter,
        SetRegWithDmap,
        Seek,
        SeekToId,
        Read,
        Write,
        Close,
    }

    impl RequestType {
        pub fn from_code(code: i32) -> Option<RequestType> {
            match code {
                0 => Some(RequestType::BadMessage),
                1 => Some(RequestType::Init),
                2 => Some(RequestType::SetCompressionMethod),
                3 => Some(RequestType::SetBlockingWrite),
                4 => Some(RequestType::SetSingleWriter),
                5 => Some(RequestType::SetRegWithDmap),
                6 => Some(RequestType::Seek),
                7 => Some(RequestType::SeekToId),
                8 => Some(RequestType::Read),
                9 => Some(RequestType::Write),
                10 => Some(RequestType::Close),
                _ => None,
            }
        }
        pub fn code(&self) -> i32 {
            match self {
                RequestType::BadMessage => 0,
                RequestType::Init => 1,
                RequestType::SetCompressionMethod => 2,
                RequestType::SetBlockingWrite => 3,
                RequestType::SetSingleWriter => 4,
                RequestType::SetRegWithDmap => 5,
                RequestType::Seek => 6,
                RequestType::SeekToId => 7,
                RequestType::Read => 8,
                RequestType::Write => 9,
                RequestType::Close => 10,
            }
        }
    }

    impl fmt::Display for RequestType {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let name = match self {
                RequestType::BadMessage => "BAD_MESSAGE",
                RequestType::Init => "INIT",
                RequestType::SetCompressionMethod => "SET_COMPRESSION_METHOD",
                RequestType::SetBlockingWrite => "SET_BLOCKING_WRITE",
                RequestType::SetSingleWriter => "SET_SINGLE_WRITER",
                RequestType::SetRegWithDmap => "SET_REG_WITH_DMAP",
                RequestType::Seek => "SEEK",
                RequestType::SeekToId => "SEEK_TO_ID",
                RequestType::Read => "READ",
                RequestType::Write => "WRITE",
                RequestType::Close => "CLOSE",
            };
            write!(f, "{}", name)
        }
    }

    ///
    /// Queue parameters sent with INIT.
    ///
    #[derive(Debug, Clone, PartialEq)]
    pub struct InitInfo {
        pub proc_name: String,
        pub open_mode: OpenMode,
        pub open_position: OpenPosition,
        pub compress: bool,
        pub num_slots: i32,
        pub buf_size: i32,
    }

    ///
    /// Describes one message of a WRITE request.  `msg_len` must match
    /// the length of the data blob that accompanies it.
    ///
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MsgInfo {
        pub msg_type: i32,
        pub subtype: i32,
        pub msg_len: i32,
        pub pre_compressed: bool,
        pub uncompressed_len: i32,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct WriteItem {
        pub info: MsgInfo,
        pub data: Vec<u8>,
    }

    impl WriteItem {
        /// An uncompressed message.
        pub fn new(msg_type: i32, subtype: i32, data: &[u8]) -> WriteItem {
            WriteItem {
                info: MsgInfo {
                    msg_type,
                    subtype,
                    msg_len: data.len() as i32,
                    pre_compressed: false,
                    uncompressed_len: data.len() as i32,
                },
                data: data.to_vec(),
            }
        }
        /// A message the client already gzip compressed.
        pub fn pre_compressed(
            msg_type: i32,
            subtype: i32,
            data: &[u8],
            uncompressed_len: i32,
        ) -> WriteItem {
            WriteItem {
                info: MsgInfo {
                    msg_type,
                    subtype,
                    msg_len: data.len() as i32,
                    pre_compressed: true,
                    uncompressed_len,
                },
                data: data.to_vec(),
            }
        }
    }

    ///
    /// A decoded queue request.  INIT keeps its fields optional so that
    /// the session, not the framer, reports which one is missing.
    ///
    #[derive(Debug, Clone, PartialEq)]
    pub enum Request {
        Init {
            url: Option<String>,
            info: Option<InitInfo>,
        },
        SetCompressionMethod(CompressionMethod),
        SetBlockingWrite,
        SetSingleWriter,
        SetRegWithDmap {
            enabled: bool,
            interval_secs: i32,
        },
        Seek(SeekPosition),
        SeekToId(i32),
        Read {
            msg_type: i32,
        },
        Write(Vec<WriteItem>),
        Close,
    }

    impl Request {
        pub fn request_type(&self) -> RequestType {
            match self {
                Request::Init { .. } => RequestType::Init,
                Request::SetCompressionMethod(_) => RequestType::SetCompressionMethod,
                Request::SetBlockingWrite => RequestType::SetBlockingWrite,
                Request::SetSingleWriter => RequestType::SetSingleWriter,
                Request::SetRegWithDmap { .. } => RequestType::SetRegWithDmap,
                Request::Seek(_) => RequestType::Seek,
                Request::SeekToId(_) => RequestType::SeekToId,
                Request::Read { .. } => RequestType::Read,
                Request::Write(_) => RequestType::Write,
                Request::Close => RequestType::Close,
            }
        }
    }

    /// A request plus the client's debug flag from the envelope header.
    #[derive(Debug, Clone, PartialEq)]
    pub struct DecodedRequest {
        pub request: Request,
        pub debug: bool,
    }

    ///
    /// The answer to one request.  `err_str` is present exactly when
    /// `status` is nonzero; `messages` is only filled for READ.
    ///
    #[derive(Debug, Clone, PartialEq)]
    pub struct Reply {
        pub request_type: RequestType,
        pub status: i32,
        pub err_str: Option<String>,
        pub messages: Vec<QueueMessage>,
    }

    impl Reply {
        pub fn success(request_type: RequestType) -> Reply {
            Reply {
                request_type,
                status: 0,
                err_str: None,
                messages: Vec::new(),
            }
        }
        pub fn failure(request_type: RequestType, message: &str) -> Reply {
            Reply {
                request_type,
                status: -1,
                err_str: Some(String::from(message)),
                messages: Vec::new(),
            }
        }
        pub fn read(messages: Vec<QueueMessage>) -> Reply {
            Reply {
                request_type: RequestType::Read,
                status: 0,
                err_str: None,
                messages,
            }
        }
        pub fn is_success(&self) -> bool {
            self.status == 0
        }
    }

    ///
    /// Server administration commands.  These travel under their own
    /// transport tag and work whether or not a queue is open.
    ///
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum StatusCommand {
        IsAlive,
        GetNumClients,
        Shutdown,
    }

    impl StatusCommand {
        pub fn from_code(code: i32) -> Option<StatusCommand> {
            match code {
                1 => Some(StatusCommand::IsAlive),
                2 => Some(StatusCommand::GetNumClients),
                3 => Some(StatusCommand::Shutdown),
                _ => None,
            }
        }
        pub fn code(&self) -> i32 {
            match self {
                StatusCommand::IsAlive => 1,
                StatusCommand::GetNumClients => 2,
                StatusCommand::Shutdown => 3,
            }
        }
    }

    ///
    /// Replies on the status channel.  `ServiceDenied` is sent unasked
    /// to a client the server has no room for; `Error` answers a status
    /// message the server could not make sense of.
    ///
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum StatusReply {
        Alive { pid: u32, instance: String },
        NumClients(u32),
        ShuttingDown,
        ServiceDenied(String),
        Error(String),
    }
}
