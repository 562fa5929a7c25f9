pub mod session {
    //!
    //! One `Session` serves one client connection.  It reads framed
    //! requests, drives its own `FmqStore` handle and writes exactly one
    //! reply per request, except for CLOSE which is answered by silence
    //! and the end of the conversation.
    //!
    //! A session goes `AwaitingInit -> Active -> Closed`.  Until an INIT
    //! succeeds every other queue request is refused with an error
    //! reply.  Once active, requests are taken in any order; the store
    //! decides what makes sense.  Store and protocol errors become
    //! error replies; only transport failures end the session.
    //!
    use crate::fmq::store::store::{FmqStore, InitParams, OpenMode, StoreError, StoreFactory};
    use crate::protocol::framer::framer;
    use crate::protocol::messages::messages::*;
    use crate::protocol::url::url::FmqUrl;
    use crate::server::server::server::ServerContext;
    use crate::server::transport::transport::{
        self, DS_FMQ_MESSAGE, DS_SERVER_STATUS_MESSAGE,
    };
    use crate::session::batcher::batcher::{self, ReadLimits};
    use log::{debug, info, trace, warn};
    use std::io::{Read, Write};
    use std::path::PathBuf;
    use std::process;
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SessionState {
        AwaitingInit,
        Active,
        Closed,
    }

    ///
    /// Why `handle_connection` returned.
    ///
    /// *   Disconnected - the client hung up between requests.
    /// *   Closed - the client sent CLOSE.
    /// *   Shutdown - the client asked the server to shut down.
    /// *   TransportError - reading or writing the socket failed.
    ///
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SessionEnd {
        Disconnected,
        Closed,
        Shutdown,
        TransportError(String),
    }

    pub const DEFAULT_MAX_SLOTS: i32 = 1_000_000;
    pub const DEFAULT_MAX_BUF_SIZE: i32 = 1 << 30;

    ///
    /// Per session settings, shared by every session of a server.
    /// `max_slots` and `max_buf_size` bound the geometry a client may
    /// ask for when its INIT creates a queue.
    ///
    #[derive(Debug, Clone)]
    pub struct SessionOptions {
        pub data_dir: PathBuf,
        pub read_limits: ReadLimits,
        pub max_frame: usize,
        pub max_slots: i32,
        pub max_buf_size: i32,
    }

    impl Default for SessionOptions {
        fn default() -> SessionOptions {
            SessionOptions {
                data_dir: PathBuf::from("."),
                read_limits: ReadLimits::default(),
                max_frame: transport::DEFAULT_MAX_FRAME,
                max_slots: DEFAULT_MAX_SLOTS,
                max_buf_size: DEFAULT_MAX_BUF_SIZE,
            }
        }
    }

    pub struct Session {
        name: String,
        state: SessionState,
        verbose: bool,
        store: Option<Box<dyn FmqStore>>,
        factory: Arc<dyn StoreFactory>,
        context: Arc<ServerContext>,
        options: SessionOptions,
    }

    impl Session {
        ///
        /// `name` labels the session in the log, typically the peer
        /// address.  No store exists until the first successful INIT.
        ///
        pub fn new(
            name: &str,
            factory: Arc<dyn StoreFactory>,
            context: Arc<ServerContext>,
            options: SessionOptions,
        ) -> Session {
            Session {
                name: String::from(name),
                state: SessionState::AwaitingInit,
                verbose: false,
                store: None,
                factory,
                context,
                options,
            }
        }

        pub fn state(&self) -> SessionState {
            self.state
        }

        ///
        /// Serve requests on `stream` until the client closes, hangs up
        /// or the transport fails.  The store is always released by the
        /// time this returns.
        ///
        pub fn handle_connection<S: Read + Write>(&mut self, stream: &mut S) -> SessionEnd {
            let end = self.serve(stream);
            self.release();
            debug!("{}: session ended: {:?}", self.name, end);
            end
        }

        fn serve<S: Read + Write>(&mut self, stream: &mut S) -> SessionEnd {
            loop {
                let frame = match transport::read_frame(stream, self.options.max_frame) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => return SessionEnd::Disconnected,
                    Err(e) => return SessionEnd::TransportError(e.to_string()),
                };
                self.context.touch();

                let (tag, reply, end) = match frame.tag {
                    DS_FMQ_MESSAGE => match self.handle_request(&frame.payload) {
                        Some(reply) => (DS_FMQ_MESSAGE, reply, None),
                        None => return SessionEnd::Closed,
                    },
                    DS_SERVER_STATUS_MESSAGE => {
                        let (reply, shutdown) = self.handle_status(&frame.payload);
                        let end = if shutdown {
                            Some(SessionEnd::Shutdown)
                        } else {
                            None
                        };
                        (DS_SERVER_STATUS_MESSAGE, reply, end)
                    }
                    other => {
                        warn!("{}: unknown message tag {}", self.name, other);
                        let reply = framer::encode_error_reply(
                            RequestType::BadMessage,
                            &format!("unknown message tag {}", other),
                        );
                        (DS_FMQ_MESSAGE, reply, None)
                    }
                };

                if let Err(e) = transport::write_frame(stream, tag, frame.seq, &reply) {
                    return SessionEnd::TransportError(e.to_string());
                }
                if let Some(end) = end {
                    return end;
                }
            }
        }

        // Decode and dispatch one queue request.  None means no reply
        // is to be sent (CLOSE).
        //
        fn handle_request(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
            match framer::decode_request(payload) {
                Ok(decoded) => {
                    self.verbose = decoded.debug;
                    if self.verbose {
                        trace!("{}: request {:?}", self.name, decoded.request);
                    }
                    self.dispatch(decoded.request)
                        .map(|reply| framer::encode_reply(&reply))
                }
                Err(failure) => {
                    self.verbose = failure.debug;
                    let request_type = failure.request_type.unwrap_or(RequestType::BadMessage);
                    warn!(
                        "{}: malformed {} message: {}",
                        self.name, request_type, failure.error
                    );
                    Some(framer::encode_error_reply(
                        request_type,
                        &format!("malformed {} message: {}", request_type, failure.error),
                    ))
                }
            }
        }

        ///
        /// Apply one decoded request and produce its reply, or None for
        /// CLOSE.
        ///
        pub fn dispatch(&mut self, request: Request) -> Option<Reply> {
            let t = request.request_type();
            if self.state == SessionState::Closed {
                return Some(Reply::failure(t, "session is closed"));
            }
            let reply = match request {
                Request::Close => {
                    self.release();
                    return None;
                }
                Request::Init { url, info } => self.init(url, info),
                Request::SetCompressionMethod(method) => self.with_store(t, |store, _| {
                    store.set_compression_method(method);
                    Ok(Reply::success(t))
                }),
                Request::SetBlockingWrite => self.with_store(t, |store, _| {
                    store.set_blocking_write();
                    Ok(Reply::success(t))
                }),
                Request::SetSingleWriter => self.with_store(t, |store, _| {
                    store.set_single_writer();
                    Ok(Reply::success(t))
                }),
                Request::SetRegWithDmap {
                    enabled,
                    interval_secs,
                } => self.with_store(t, |store, _| {
                    store.set_register_with_dmap(enabled, interval_secs);
                    Ok(Reply::success(t))
                }),
                Request::Seek(position) => self.with_store(t, |store, _| {
                    store.seek(position)?;
                    Ok(Reply::success(t))
                }),
                Request::SeekToId(id) => self.with_store(t, |store, _| {
                    store.seek_to_id(id)?;
                    Ok(Reply::success(t))
                }),
                Request::Read { msg_type } => self.with_store(t, |store, limits| {
                    Ok(Reply::read(batcher::drain(store, msg_type, limits)?))
                }),
                Request::Write(items) => self.with_store(t, |store, _| {
                    write_items(store, &items)?;
                    Ok(Reply::success(t))
                }),
            };
            if !reply.is_success() {
                debug!(
                    "{}: {} failed: {}",
                    self.name,
                    t,
                    reply.err_str.as_deref().unwrap_or("")
                );
            }
            Some(reply)
        }

        // Run `op` against the open store, turning a store error into
        // a failure reply.
        //
        fn with_store<F>(&mut self, t: RequestType, op: F) -> Reply
        where
            F: FnOnce(&mut dyn FmqStore, &ReadLimits) -> Result<Reply, StoreError>,
        {
            if self.state != SessionState::Active {
                return Reply::failure(t, &format!("queue not open, INIT required before {}", t));
            }
            let limits = self.options.read_limits;
            match self.store.as_mut() {
                Some(store) => match op(store.as_mut(), &limits) {
                    Ok(reply) => reply,
                    Err(e) => Reply::failure(t, &e.to_string()),
                },
                None => Reply::failure(t, &StoreError::NotOpen.to_string()),
            }
        }

        fn init(&mut self, url: Option<String>, info: Option<InitInfo>) -> Reply {
            let t = RequestType::Init;
            if self.state == SessionState::Active {
                return Reply::failure(t, "queue already open, only one INIT allowed per connection");
            }
            let url = match url {
                Some(url) if !url.trim().is_empty() => url,
                _ => return Reply::failure(t, "INIT request has no url"),
            };
            let parsed = match FmqUrl::parse(&url) {
                Ok(parsed) => parsed,
                Err(e) => return Reply::failure(t, &format!("bad url: {}", e)),
            };
            let info = match info {
                Some(info) => info,
                None => return Reply::failure(t, "INIT request has no init info"),
            };
            if let Err(e) = self.check_geometry(&info) {
                warn!("{}: refusing {}: {}", self.name, url, e);
                return Reply::failure(t, &format!("cannot open {}: {}", url, e));
            }

            let params = InitParams {
                path: parsed.resolve(&self.options.data_dir),
                proc_name: info.proc_name,
                verbose: self.verbose,
                open_mode: info.open_mode,
                open_position: info.open_position,
                compress: info.compress,
                num_slots: info.num_slots,
                buf_size: info.buf_size,
            };
            let mut store = self.factory.create();
            if let Err(e) = store.init(&params) {
                warn!("{}: cannot open {}: {}", self.name, url, e);
                return Reply::failure(t, &format!("cannot open {}: {}", url, e));
            }
            store.set_server_mode();
            info!(
                "{}: opened {} ({:?}) for {}",
                self.name,
                params.path.display(),
                params.open_mode,
                params.proc_name
            );
            self.store = Some(store);
            self.state = SessionState::Active;
            Reply::success(t)
        }

        fn check_geometry(&self, info: &InitInfo) -> Result<(), StoreError> {
            let creates = match info.open_mode {
                OpenMode::Create | OpenMode::ReadWrite => true,
                _ => false,
            };
            if creates
                && (info.num_slots > self.options.max_slots
                    || info.buf_size > self.options.max_buf_size)
            {
                return Err(StoreError::Geometry(format!(
                    "{} slots and {} bytes exceed the limit of {} slots and {} bytes",
                    info.num_slots, info.buf_size, self.options.max_slots, self.options.max_buf_size
                )));
            }
            Ok(())
        }

        // Answer a server status command.  The flag is true when the
        // server should shut down.
        //
        fn handle_status(&mut self, payload: &[u8]) -> (Vec<u8>, bool) {
            let (reply, shutdown) = match framer::decode_status_command(payload) {
                Ok(StatusCommand::IsAlive) => (
                    StatusReply::Alive {
                        pid: process::id(),
                        instance: self.context.instance().to_string(),
                    },
                    false,
                ),
                Ok(StatusCommand::GetNumClients) => (
                    StatusReply::NumClients(self.context.num_clients() as u32),
                    false,
                ),
                Ok(StatusCommand::Shutdown) => {
                    info!("{}: shutdown requested", self.name);
                    self.context.request_shutdown();
                    (StatusReply::ShuttingDown, true)
                }
                Err(e) => {
                    warn!("{}: bad status message: {}", self.name, e);
                    (StatusReply::Error(format!("bad status message: {}", e)), false)
                }
            };
            (framer::encode_status_reply(&reply), shutdown)
        }

        // Close the store, if any, and enter the terminal state.
        //
        fn release(&mut self) {
            if let Some(mut store) = self.store.take() {
                if let Err(e) = store.close() {
                    debug!("{}: close failed: {}", self.name, e);
                }
            }
            self.state = SessionState::Closed;
        }
    }

    // Items are written in order; the first failure stops the request
    // and earlier writes stay in the queue.
    //
    fn write_items(store: &mut dyn FmqStore, items: &[WriteItem]) -> Result<(), StoreError> {
        for (i, item) in items.iter().enumerate() {
            let info = &item.info;
            let result = if info.pre_compressed {
                store.write_msg_pre_compressed(
                    info.msg_type,
                    info.subtype,
                    &item.data,
                    info.uncompressed_len,
                )
            } else {
                store.write_msg(info.msg_type, info.subtype, &item.data)
            };
            if let Err(e) = result {
                warn!("write of item {} of {} failed: {}", i + 1, items.len(), e);
                return Err(e);
            }
        }
        Ok(())
    }

}
