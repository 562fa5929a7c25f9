pub mod client {
    //!
    //! A blocking client for the queue server.  Each call sends one
    //! request and waits for its reply; a reply with a nonzero status
    //! comes back as `ClientError::Request` carrying the server's error
    //! string, and the connection stays usable.
    //!
    use crate::fmq::store::store::{CompressionMethod, QueueMessage, SeekPosition};
    use crate::protocol::framer::framer::{self, MalformedMessage};
    use crate::protocol::messages::messages::*;
    use crate::server::transport::transport::{
        self, FrameError, DEFAULT_MAX_FRAME, DS_FMQ_MESSAGE, DS_SERVER_STATUS_MESSAGE,
    };
    use std::net::{TcpStream, ToSocketAddrs};
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum ClientError {
        #[error("connection to server failed: {0}")]
        ConnectionFailed(std::io::Error),
        #[error("{0}")]
        Transport(#[from] FrameError),
        #[error("server closed the connection")]
        ConnectionLost,
        #[error("unintelligible reply: {0}")]
        BadReply(#[from] MalformedMessage),
        #[error("expected a {expected} reply, got {got}")]
        UnexpectedReply {
            expected: RequestType,
            got: RequestType,
        },
        #[error("service denied: {0}")]
        ServiceDenied(String),
        #[error("{0}")]
        Request(String),
    }

    pub struct FmqClient {
        stream: TcpStream,
        seq: i32,
        debug: bool,
    }

    impl FmqClient {
        pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<FmqClient, ClientError> {
            let stream = TcpStream::connect(addr).map_err(ClientError::ConnectionFailed)?;
            Ok(FmqClient {
                stream,
                seq: 0,
                debug: false,
            })
        }

        /// Set the debug flag carried by every following request.
        pub fn set_debug(&mut self, debug: bool) {
            self.debug = debug;
        }

        pub fn init(&mut self, url: &str, info: InitInfo) -> Result<(), ClientError> {
            self.call(Request::Init {
                url: Some(String::from(url)),
                info: Some(info),
            })
            .map(|_| ())
        }
        pub fn set_compression_method(&mut self, method: CompressionMethod) -> Result<(), ClientError> {
            self.call(Request::SetCompressionMethod(method)).map(|_| ())
        }
        pub fn set_blocking_write(&mut self) -> Result<(), ClientError> {
            self.call(Request::SetBlockingWrite).map(|_| ())
        }
        pub fn set_single_writer(&mut self) -> Result<(), ClientError> {
            self.call(Request::SetSingleWriter).map(|_| ())
        }
        pub fn set_reg_with_dmap(&mut self, enabled: bool, interval_secs: i32) -> Result<(), ClientError> {
            self.call(Request::SetRegWithDmap {
                enabled,
                interval_secs,
            })
            .map(|_| ())
        }
        pub fn seek(&mut self, position: SeekPosition) -> Result<(), ClientError> {
            self.call(Request::Seek(position)).map(|_| ())
        }
        pub fn seek_to_id(&mut self, id: i32) -> Result<(), ClientError> {
            self.call(Request::SeekToId(id)).map(|_| ())
        }
        ///
        /// Read the next batch of messages of `msg_type` (any type if
        /// not positive).  An empty batch means the reader is caught up.
        ///
        pub fn read(&mut self, msg_type: i32) -> Result<Vec<QueueMessage>, ClientError> {
            self.call(Request::Read { msg_type }).map(|reply| reply.messages)
        }
        pub fn write(&mut self, items: Vec<WriteItem>) -> Result<(), ClientError> {
            self.call(Request::Write(items)).map(|_| ())
        }
        ///
        /// CLOSE is never answered, so this only sends it.
        ///
        pub fn close(mut self) -> Result<(), ClientError> {
            let payload = framer::encode_request(&Request::Close, self.debug);
            self.send(DS_FMQ_MESSAGE, &payload)
        }

        pub fn is_alive(&mut self) -> Result<(u32, String), ClientError> {
            match self.status(StatusCommand::IsAlive)? {
                StatusReply::Alive { pid, instance } => Ok((pid, instance)),
                other => Err(unexpected_status(other)),
            }
        }
        pub fn num_clients(&mut self) -> Result<u32, ClientError> {
            match self.status(StatusCommand::GetNumClients)? {
                StatusReply::NumClients(n) => Ok(n),
                other => Err(unexpected_status(other)),
            }
        }
        pub fn shutdown(&mut self) -> Result<(), ClientError> {
            match self.status(StatusCommand::Shutdown)? {
                StatusReply::ShuttingDown => Ok(()),
                other => Err(unexpected_status(other)),
            }
        }

        fn call(&mut self, request: Request) -> Result<Reply, ClientError> {
            let expected = request.request_type();
            let payload = framer::encode_request(&request, self.debug);
            self.send(DS_FMQ_MESSAGE, &payload)?;
            let frame = self.receive()?;
            if frame.tag == DS_SERVER_STATUS_MESSAGE {
                return Err(unexpected_status(framer::decode_status_reply(&frame.payload)?));
            }
            let reply = framer::decode_reply(&frame.payload)?;
            if !reply.is_success() {
                return Err(ClientError::Request(
                    reply.err_str.unwrap_or_else(|| String::from("request failed")),
                ));
            }
            if reply.request_type != expected {
                return Err(ClientError::UnexpectedReply {
                    expected,
                    got: reply.request_type,
                });
            }
            Ok(reply)
        }

        fn status(&mut self, command: StatusCommand) -> Result<StatusReply, ClientError> {
            self.send(DS_SERVER_STATUS_MESSAGE, &framer::encode_status_command(command))?;
            let frame = self.receive()?;
            Ok(framer::decode_status_reply(&frame.payload)?)
        }

        fn send(&mut self, tag: i32, payload: &[u8]) -> Result<(), ClientError> {
            self.seq = self.seq.wrapping_add(1);
            transport::write_frame(&mut self.stream, tag, self.seq, payload)?;
            Ok(())
        }

        fn receive(&mut self) -> Result<transport::Frame, ClientError> {
            transport::read_frame(&mut self.stream, DEFAULT_MAX_FRAME)?.ok_or(ClientError::ConnectionLost)
        }
    }

    fn unexpected_status(reply: StatusReply) -> ClientError {
        match reply {
            StatusReply::ServiceDenied(why) => ClientError::ServiceDenied(why),
            StatusReply::Error(why) => ClientError::Request(why),
            other => ClientError::Request(format!("unexpected status reply {:?}", other)),
        }
    }
}
