pub mod framer {
    //!
    //! Converts between envelope bytes and `Request`/`Reply` values.
    //! An envelope is a fixed header followed by tagged parts:
    //!
    //! ```text
    //! header: type i32 | sub_type i32 | mode i32 | flags i32 | status i32 | n_parts i32
    //! part:   part_id i32 | len i32 | bytes[len]
    //! ```
    //!
    //! All integers are big-endian.  Nothing here knows about queues
    //! or sessions.
    //!
    use crate::fmq::store::store::{
        CompressionMethod, OpenMode, OpenPosition, QueueMessage, SeekPosition,
    };
    use crate::protocol::messages::messages::*;
    use byteorder::{BigEndian, ByteOrder};
    use thiserror::Error;

    pub const HEADER_LEN: usize = 24;
    pub const PART_HEADER_LEN: usize = 8;

    pub const FLAG_DEBUG: i32 = 0x1;

    pub const PART_URL: i32 = 1;
    pub const PART_INIT_INFO: i32 = 2;
    pub const PART_MSG_INFO: i32 = 3;
    pub const PART_MSG_DATA: i32 = 4;
    pub const PART_ERR_STRING: i32 = 5;
    pub const PART_READ_MSG: i32 = 6;
    pub const PART_STATUS_INFO: i32 = 7;

    const STATUS_REPLY_ERROR: i32 = 0;
    const STATUS_REPLY_SERVICE_DENIED: i32 = 4;

    /// The ways an envelope can fail to decode.
    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum MalformedMessage {
        #[error("message truncated: needed {needed} bytes, {available} available")]
        Underrun { needed: usize, available: usize },
        #[error("{0} unexpected bytes after the last part")]
        TrailingBytes(usize),
        #[error("negative length {0}")]
        NegativeLength(i32),
        #[error("unknown request type {0}")]
        UnknownRequestType(i32),
        #[error("unknown status command {0}")]
        UnknownStatusCommand(i32),
        #[error("invalid seek position {0}")]
        BadSeekPosition(i32),
        #[error("invalid init info: {0}")]
        BadInitInfo(String),
        #[error("{info} message infos but {data} message data parts")]
        MismatchedParts { info: usize, data: usize },
        #[error("message info declares {declared} bytes but {actual} were sent")]
        LengthMismatch { declared: i32, actual: usize },
        #[error("duplicate part {0}")]
        DuplicatePart(i32),
        #[error("part {part} not allowed in {request}")]
        UnexpectedPart { part: i32, request: RequestType },
        #[error("string is not valid UTF-8")]
        BadString,
    }

    ///
    /// What `decode_request` could salvage from a bad message: the request
    /// type if the header got that far, the debug flag, and the reason.
    ///
    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    #[error("{error}")]
    pub struct DecodeFailure {
        pub request_type: Option<RequestType>,
        pub debug: bool,
        pub error: MalformedMessage,
    }

    /////////////////////////////////////////////////////////////
    // Structured reader / writer.

    struct Reader<'a> {
        bytes: &'a [u8],
        pos: usize,
    }

    impl<'a> Reader<'a> {
        fn new(bytes: &'a [u8]) -> Reader<'a> {
            Reader { bytes, pos: 0 }
        }
        fn remaining(&self) -> usize {
            self.bytes.len() - self.pos
        }
        fn take(&mut self, n: usize) -> Result<&'a [u8], MalformedMessage> {
            if self.remaining() < n {
                return Err(MalformedMessage::Underrun {
                    needed: n,
                    available: self.remaining(),
                });
            }
            let slice = &self.bytes[self.pos..self.pos + n];
            self.pos += n;
            Ok(slice)
        }
        fn i32(&mut self) -> Result<i32, MalformedMessage> {
            Ok(BigEndian::read_i32(self.take(4)?))
        }
        fn i64(&mut self) -> Result<i64, MalformedMessage> {
            Ok(BigEndian::read_i64(self.take(8)?))
        }
        fn len(&mut self) -> Result<usize, MalformedMessage> {
            let len = self.i32()?;
            if len < 0 {
                return Err(MalformedMessage::NegativeLength(len));
            }
            Ok(len as usize)
        }
        fn blob(&mut self) -> Result<&'a [u8], MalformedMessage> {
            let len = self.len()?;
            self.take(len)
        }
        fn string(&mut self) -> Result<String, MalformedMessage> {
            let bytes = self.blob()?;
            utf8(bytes)
        }
        fn finish(&self) -> Result<(), MalformedMessage> {
            match self.remaining() {
                0 => Ok(()),
                n => Err(MalformedMessage::TrailingBytes(n)),
            }
        }
    }

    #[derive(Default)]
    struct Writer {
        buf: Vec<u8>,
    }

    impl Writer {
        fn i32(&mut self, value: i32) -> &mut Writer {
            let mut b = [0u8; 4];
            BigEndian::write_i32(&mut b, value);
            self.buf.extend_from_slice(&b);
            self
        }
        fn i64(&mut self, value: i64) -> &mut Writer {
            let mut b = [0u8; 8];
            BigEndian::write_i64(&mut b, value);
            self.buf.extend_from_slice(&b);
            self
        }
        fn blob(&mut self, bytes: &[u8]) -> &mut Writer {
            self.i32(bytes.len() as i32);
            self.buf.extend_from_slice(bytes);
            self
        }
    }

    fn utf8(bytes: &[u8]) -> Result<String, MalformedMessage> {
        String::from_utf8(bytes.to_vec()).map_err(|_| MalformedMessage::BadString)
    }

    /////////////////////////////////////////////////////////////
    // Envelope.

    struct Part<'a> {
        id: i32,
        data: &'a [u8],
    }

    struct Envelope<'a> {
        msg_type: i32,
        sub_type: i32,
        mode: i32,
        flags: i32,
        status: i32,
        parts: Vec<Part<'a>>,
    }

    impl<'a> Envelope<'a> {
        fn new(msg_type: i32) -> Envelope<'a> {
            Envelope {
                msg_type,
                sub_type: 0,
                mode: 0,
                flags: 0,
                status: 0,
                parts: Vec::new(),
            }
        }
        fn add(&mut self, id: i32, data: &'a [u8]) -> &mut Envelope<'a> {
            self.parts.push(Part { id, data });
            self
        }
        fn parts_with(&self, id: i32) -> impl Iterator<Item = &Part<'a>> {
            self.parts.iter().filter(move |p| p.id == id)
        }
        fn single(&self, id: i32) -> Result<Option<&'a [u8]>, MalformedMessage> {
            let mut found = self.parts_with(id);
            let first = found.next().map(|p| p.data);
            if found.next().is_some() {
                return Err(MalformedMessage::DuplicatePart(id));
            }
            Ok(first)
        }
        fn encode(&self) -> Vec<u8> {
            let mut w = Writer::default();
            w.i32(self.msg_type)
                .i32(self.sub_type)
                .i32(self.mode)
                .i32(self.flags)
                .i32(self.status)
                .i32(self.parts.len() as i32);
            for part in &self.parts {
                w.i32(part.id).blob(part.data);
            }
            w.buf
        }
    }

    // The header fields that were readable when decoding stopped.
    struct EnvelopeFailure {
        msg_type: Option<i32>,
        flags: i32,
        error: MalformedMessage,
    }

    fn decode_envelope(bytes: &[u8]) -> Result<Envelope<'_>, EnvelopeFailure> {
        let mut r = Reader::new(bytes);
        let mut failure = EnvelopeFailure {
            msg_type: None,
            flags: 0,
            error: MalformedMessage::BadString,
        };
        macro_rules! field {
            ($e:expr) => {
                match $e {
                    Ok(v) => v,
                    Err(error) => {
                        failure.error = error;
                        return Err(failure);
                    }
                }
            };
        }
        let msg_type = field!(r.i32());
        failure.msg_type = Some(msg_type);
        let sub_type = field!(r.i32());
        let mode = field!(r.i32());
        let flags = field!(r.i32());
        failure.flags = flags;
        let status = field!(r.i32());
        let n_parts = field!(r.len());
        let mut parts = Vec::new();
        for _ in 0..n_parts {
            let id = field!(r.i32());
            let data = field!(r.blob());
            parts.push(Part { id, data });
        }
        field!(r.finish());
        Ok(Envelope {
            msg_type,
            sub_type,
            mode,
            flags,
            status,
            parts,
        })
    }

    /////////////////////////////////////////////////////////////
    // Sub-structures.

    fn encode_init_info(info: &InitInfo) -> Vec<u8> {
        let mut w = Writer::default();
        w.blob(info.proc_name.as_bytes())
            .i32(info.open_mode.code())
            .i32(info.open_position.code())
            .i32(info.compress as i32)
            .i32(info.num_slots)
            .i32(info.buf_size);
        w.buf
    }

    fn decode_init_info(bytes: &[u8]) -> Result<InitInfo, MalformedMessage> {
        let mut r = Reader::new(bytes);
        let proc_name = r.string()?;
        let mode = r.i32()?;
        let open_mode = OpenMode::from_code(mode)
            .ok_or_else(|| MalformedMessage::BadInitInfo(format!("open mode {}", mode)))?;
        let position = r.i32()?;
        let open_position = OpenPosition::from_code(position).ok_or_else(|| {
            MalformedMessage::BadInitInfo(format!("open position {}", position))
        })?;
        let compress = r.i32()? != 0;
        let num_slots = r.i32()?;
        let buf_size = r.i32()?;
        r.finish()?;
        Ok(InitInfo {
            proc_name,
            open_mode,
            open_position,
            compress,
            num_slots,
            buf_size,
        })
    }

    fn encode_msg_info(info: &MsgInfo) -> Vec<u8> {
        let mut w = Writer::default();
        w.i32(info.msg_type)
            .i32(info.subtype)
            .i32(info.msg_len)
            .i32(info.pre_compressed as i32)
            .i32(info.uncompressed_len);
        w.buf
    }

    fn decode_msg_info(bytes: &[u8]) -> Result<MsgInfo, MalformedMessage> {
        let mut r = Reader::new(bytes);
        let info = MsgInfo {
            msg_type: r.i32()?,
            subtype: r.i32()?,
            msg_len: r.i32()?,
            pre_compressed: r.i32()? != 0,
            uncompressed_len: r.i32()?,
        };
        r.finish()?;
        Ok(info)
    }

    fn encode_queue_message(msg: &QueueMessage) -> Vec<u8> {
        let mut w = Writer::default();
        w.i32(msg.id)
            .i32(msg.msg_type)
            .i32(msg.subtype)
            .i64(msg.time)
            .i32(msg.compressed as i32)
            .i32(msg.uncompressed_len)
            .blob(&msg.data);
        w.buf
    }

    fn decode_queue_message(bytes: &[u8]) -> Result<QueueMessage, MalformedMessage> {
        let mut r = Reader::new(bytes);
        let msg = QueueMessage {
            id: r.i32()?,
            msg_type: r.i32()?,
            subtype: r.i32()?,
            time: r.i64()?,
            compressed: r.i32()? != 0,
            uncompressed_len: r.i32()?,
            data: r.blob()?.to_vec(),
        };
        r.finish()?;
        Ok(msg)
    }

    /////////////////////////////////////////////////////////////
    // Requests.

    fn request_from_envelope(
        request_type: RequestType,
        env: &Envelope<'_>,
    ) -> Result<Request, MalformedMessage> {
        if request_type != RequestType::Write {
            for id in &[PART_MSG_INFO, PART_MSG_DATA] {
                if env.parts_with(*id).next().is_some() {
                    return Err(MalformedMessage::UnexpectedPart {
                        part: *id,
                        request: request_type,
                    });
                }
            }
        }
        let request = match request_type {
            RequestType::BadMessage => {
                return Err(MalformedMessage::UnknownRequestType(env.msg_type));
            }
            RequestType::Init => {
                let url = match env.single(PART_URL)? {
                    Some(bytes) => Some(utf8(bytes)?),
                    None => None,
                };
                let info = match env.single(PART_INIT_INFO)? {
                    Some(bytes) => Some(decode_init_info(bytes)?),
                    None => None,
                };
                Request::Init { url, info }
            }
            RequestType::SetCompressionMethod => {
                Request::SetCompressionMethod(CompressionMethod::from_code(env.sub_type))
            }
            RequestType::SetBlockingWrite => Request::SetBlockingWrite,
            RequestType::SetSingleWriter => Request::SetSingleWriter,
            RequestType::SetRegWithDmap => Request::SetRegWithDmap {
                enabled: env.sub_type != 0,
                interval_secs: env.mode,
            },
            RequestType::Seek => Request::Seek(
                SeekPosition::from_code(env.sub_type)
                    .ok_or(MalformedMessage::BadSeekPosition(env.sub_type))?,
            ),
            RequestType::SeekToId => Request::SeekToId(env.sub_type),
            RequestType::Read => Request::Read {
                msg_type: env.sub_type,
            },
            RequestType::Write => {
                let infos = env
                    .parts_with(PART_MSG_INFO)
                    .map(|p| decode_msg_info(p.data))
                    .collect::<Result<Vec<MsgInfo>, MalformedMessage>>()?;
                let data: Vec<&[u8]> = env.parts_with(PART_MSG_DATA).map(|p| p.data).collect();
                if infos.len() != data.len() {
                    return Err(MalformedMessage::MismatchedParts {
                        info: infos.len(),
                        data: data.len(),
                    });
                }
                let mut items = Vec::with_capacity(infos.len());
                for (info, bytes) in infos.into_iter().zip(data) {
                    if info.msg_len < 0 || info.msg_len as usize != bytes.len() {
                        return Err(MalformedMessage::LengthMismatch {
                            declared: info.msg_len,
                            actual: bytes.len(),
                        });
                    }
                    items.push(WriteItem {
                        info,
                        data: bytes.to_vec(),
                    });
                }
                Request::Write(items)
            }
            RequestType::Close => Request::Close,
        };
        Ok(request)
    }

    ///
    /// Decode one request envelope.  On failure the returned
    /// `DecodeFailure` carries the request type whenever the header was
    /// readable, so the caller can still answer with a typed error reply.
    ///
    pub fn decode_request(bytes: &[u8]) -> Result<DecodedRequest, DecodeFailure> {
        let env = decode_envelope(bytes).map_err(|f| DecodeFailure {
            request_type: f
                .msg_type
                .and_then(RequestType::from_code)
                .filter(|t| *t != RequestType::BadMessage),
            debug: f.flags & FLAG_DEBUG != 0,
            error: f.error,
        })?;
        let debug = env.flags & FLAG_DEBUG != 0;
        let request_type = match RequestType::from_code(env.msg_type) {
            Some(t) if t != RequestType::BadMessage => t,
            _ => {
                return Err(DecodeFailure {
                    request_type: None,
                    debug,
                    error: MalformedMessage::UnknownRequestType(env.msg_type),
                })
            }
        };
        match request_from_envelope(request_type, &env) {
            Ok(request) => Ok(DecodedRequest { request, debug }),
            Err(error) => Err(DecodeFailure {
                request_type: Some(request_type),
                debug,
                error,
            }),
        }
    }

    ///
    /// Encode a request, as a client would send it.
    ///
    pub fn encode_request(request: &Request, debug: bool) -> Vec<u8> {
        // Owned sub-structures must outlive the envelope that borrows them.
        let mut owned: Vec<Vec<u8>> = Vec::new();
        let mut data_parts: Vec<(i32, usize)> = Vec::new();
        let mut env = Envelope::new(request.request_type().code());
        if debug {
            env.flags |= FLAG_DEBUG;
        }
        match request {
            Request::Init { url, info } => {
                if let Some(url) = url {
                    owned.push(url.as_bytes().to_vec());
                    data_parts.push((PART_URL, owned.len() - 1));
                }
                if let Some(info) = info {
                    owned.push(encode_init_info(info));
                    data_parts.push((PART_INIT_INFO, owned.len() - 1));
                }
            }
            Request::SetCompressionMethod(method) => env.sub_type = method.code(),
            Request::SetBlockingWrite | Request::SetSingleWriter | Request::Close => {}
            Request::SetRegWithDmap {
                enabled,
                interval_secs,
            } => {
                env.sub_type = *enabled as i32;
                env.mode = *interval_secs;
            }
            Request::Seek(position) => env.sub_type = position.code(),
            Request::SeekToId(id) => env.sub_type = *id,
            Request::Read { msg_type } => env.sub_type = *msg_type,
            Request::Write(items) => {
                for item in items {
                    owned.push(encode_msg_info(&item.info));
                    data_parts.push((PART_MSG_INFO, owned.len() - 1));
                }
                for item in items {
                    owned.push(item.data.clone());
                    data_parts.push((PART_MSG_DATA, owned.len() - 1));
                }
            }
        }
        for (id, index) in data_parts {
            env.add(id, &owned[index]);
        }
        env.encode()
    }

    /////////////////////////////////////////////////////////////
    // Replies.

    ///
    /// Encode a reply.  Total for any `Reply` value.
    ///
    pub fn encode_reply(reply: &Reply) -> Vec<u8> {
        let encoded: Vec<Vec<u8>> = reply.messages.iter().map(encode_queue_message).collect();
        let mut env = Envelope::new(reply.request_type.code());
        env.status = reply.status;
        if let Some(err) = &reply.err_str {
            env.add(PART_ERR_STRING, err.as_bytes());
        }
        for msg in &encoded {
            env.add(PART_READ_MSG, msg);
        }
        env.encode()
    }

    ///
    /// A failed reply (status -1) for `request_type` carrying `message`.
    ///
    pub fn encode_error_reply(request_type: RequestType, message: &str) -> Vec<u8> {
        encode_reply(&Reply::failure(request_type, message))
    }

    pub fn decode_reply(bytes: &[u8]) -> Result<Reply, MalformedMessage> {
        let env = decode_envelope(bytes).map_err(|f| f.error)?;
        let request_type = RequestType::from_code(env.msg_type)
            .ok_or(MalformedMessage::UnknownRequestType(env.msg_type))?;
        let err_str = match env.single(PART_ERR_STRING)? {
            Some(bytes) => Some(utf8(bytes)?),
            None => None,
        };
        let messages = env
            .parts_with(PART_READ_MSG)
            .map(|p| decode_queue_message(p.data))
            .collect::<Result<Vec<QueueMessage>, MalformedMessage>>()?;
        Ok(Reply {
            request_type,
            status: env.status,
            err_str,
            messages,
        })
    }

    /////////////////////////////////////////////////////////////
    // Server status channel.

    pub fn encode_status_command(command: StatusCommand) -> Vec<u8> {
        Envelope::new(command.code()).encode()
    }

    pub fn decode_status_command(bytes: &[u8]) -> Result<StatusCommand, MalformedMessage> {
        let env = decode_envelope(bytes).map_err(|f| f.error)?;
        StatusCommand::from_code(env.msg_type)
            .ok_or(MalformedMessage::UnknownStatusCommand(env.msg_type))
    }

    pub fn encode_status_reply(reply: &StatusReply) -> Vec<u8> {
        match reply {
            StatusReply::Alive { pid, instance } => {
                let mut env = Envelope::new(StatusCommand::IsAlive.code());
                env.sub_type = *pid as i32;
                env.add(PART_STATUS_INFO, instance.as_bytes());
                env.encode()
            }
            StatusReply::NumClients(n) => {
                let mut env = Envelope::new(StatusCommand::GetNumClients.code());
                env.sub_type = *n as i32;
                env.encode()
            }
            StatusReply::ShuttingDown => Envelope::new(StatusCommand::Shutdown.code()).encode(),
            StatusReply::ServiceDenied(message) => {
                let mut env = Envelope::new(STATUS_REPLY_SERVICE_DENIED);
                env.status = -1;
                env.add(PART_ERR_STRING, message.as_bytes());
                env.encode()
            }
            StatusReply::Error(message) => {
                let mut env = Envelope::new(STATUS_REPLY_ERROR);
                env.status = -1;
                env.add(PART_ERR_STRING, message.as_bytes());
                env.encode()
            }
        }
    }

    pub fn decode_status_reply(bytes: &[u8]) -> Result<StatusReply, MalformedMessage> {
        let env = decode_envelope(bytes).map_err(|f| f.error)?;
        let text = |id: i32| -> Result<String, MalformedMessage> {
            match env.single(id)? {
                Some(bytes) => utf8(bytes),
                None => Ok(String::new()),
            }
        };
        match env.msg_type {
            STATUS_REPLY_SERVICE_DENIED => Ok(StatusReply::ServiceDenied(text(PART_ERR_STRING)?)),
            STATUS_REPLY_ERROR => Ok(StatusReply::Error(text(PART_ERR_STRING)?)),
            code => match StatusCommand::from_code(code) {
                Some(StatusCommand::IsAlive) => Ok(StatusReply::Alive {
                    pid: env.sub_type as u32,
                    instance: text(PART_STATUS_INFO)?,
                }),
                Some(StatusCommand::GetNumClients) => {
                    Ok(StatusReply::NumClients(env.sub_type as u32))
                }
                Some(StatusCommand::Shutdown) => Ok(StatusReply::ShuttingDown),
                None => Err(MalformedMessage::UnknownStatusCommand(code)),
            },
        }
    }

}
