pub mod server {
    //!
    //! The connection acceptor.  `FmqServer` listens for clients and
    //! hands each accepted connection to its own `Session`, normally on
    //! a thread of its own.  The acceptor itself only keeps
    //! bookkeeping: how many clients are connected, when anything last
    //! happened, and whether someone asked it to shut down.
    //!
    use crate::fmq::store::store::StoreFactory;
    use crate::protocol::framer::framer;
    use crate::protocol::messages::messages::StatusReply;
    use crate::server::transport::transport::{self, DS_SERVER_STATUS_MESSAGE};
    use crate::session::session::session::{Session, SessionEnd, SessionOptions};
    use log::{debug, error, info, warn};
    use std::env;
    use std::io::{self, ErrorKind};
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};
    use thiserror::Error;

    pub const DEFAULT_PORT: u16 = 5520;
    pub const DEFAULT_MAX_CLIENTS: usize = 128;
    pub const MAX_CLIENTS_ENV: &str = "DS_SERVER_MAX_CLIENTS";

    #[derive(Debug, Error)]
    pub enum ServerError {
        #[error("cannot listen on {addr}: {source}")]
        Bind { addr: String, source: io::Error },
        #[error("invalid DS_SERVER_MAX_CLIENTS value '{0}'")]
        BadMaxClients(String),
        #[error("server I/O error: {0}")]
        Io(#[from] io::Error),
    }

    ///
    /// Everything the server needs to know to run:
    ///
    /// *   port, bind_address - where to listen.
    /// *   instance - name reported to IS_ALIVE.
    /// *   max_clients - connections beyond this many are denied.
    /// *   max_quiescent_secs - exit after this long with no clients
    /// and no activity; 0 runs forever.
    /// *   no_threads - run each session on the accept thread (debugging).
    /// *   session - settings handed to every session.
    /// *   poll_interval - how often the idle acceptor wakes up.
    ///
    #[derive(Debug, Clone)]
    pub struct ServerConfig {
        pub port: u16,
        pub bind_address: String,
        pub instance: String,
        pub max_clients: usize,
        pub max_quiescent_secs: u64,
        pub no_threads: bool,
        pub session: SessionOptions,
        pub poll_interval: Duration,
    }

    impl Default for ServerConfig {
        fn default() -> ServerConfig {
            ServerConfig {
                port: DEFAULT_PORT,
                bind_address: String::from("0.0.0.0"),
                instance: String::from("primary"),
                max_clients: DEFAULT_MAX_CLIENTS,
                max_quiescent_secs: 0,
                no_threads: false,
                session: SessionOptions::default(),
                poll_interval: Duration::from_millis(100),
            }
        }
    }

    impl ServerConfig {
        ///
        /// Let `DS_SERVER_MAX_CLIENTS` override the configured client
        /// limit.
        ///
        pub fn apply_environment(&mut self) -> Result<(), ServerError> {
            if let Some(max) = max_clients_override(env::var(MAX_CLIENTS_ENV).ok())? {
                info!("{} overrides max clients to {}", MAX_CLIENTS_ENV, max);
                self.max_clients = max;
            }
            Ok(())
        }
    }

    fn max_clients_override(value: Option<String>) -> Result<Option<usize>, ServerError> {
        match value {
            None => Ok(None),
            Some(text) => match text.trim().parse::<usize>() {
                Ok(n) if n > 0 => Ok(Some(n)),
                _ => Err(ServerError::BadMaxClients(text)),
            },
        }
    }

    ///
    /// State shared between the acceptor and its sessions.
    ///
    #[derive(Debug)]
    pub struct ServerContext {
        instance: String,
        num_clients: AtomicUsize,
        last_action: Mutex<Instant>,
        shutdown: AtomicBool,
    }

    impl ServerContext {
        pub fn new(instance: &str) -> ServerContext {
            ServerContext {
                instance: String::from(instance),
                num_clients: AtomicUsize::new(0),
                last_action: Mutex::new(Instant::now()),
                shutdown: AtomicBool::new(false),
            }
        }
        pub fn instance(&self) -> &str {
            &self.instance
        }
        pub fn num_clients(&self) -> usize {
            self.num_clients.load(Ordering::SeqCst)
        }
        pub fn client_started(&self) {
            self.num_clients.fetch_add(1, Ordering::SeqCst);
        }
        pub fn client_finished(&self) {
            let _ = self
                .num_clients
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
        /// Note activity, restarting the quiescence clock.
        pub fn touch(&self) {
            if let Ok(mut last) = self.last_action.lock() {
                *last = Instant::now();
            }
        }
        pub fn idle_time(&self) -> Duration {
            self.last_action
                .lock()
                .map(|last| last.elapsed())
                .unwrap_or_default()
        }
        pub fn request_shutdown(&self) {
            self.shutdown.store(true, Ordering::SeqCst);
        }
        pub fn shutdown_requested(&self) -> bool {
            self.shutdown.load(Ordering::SeqCst)
        }
    }

    pub struct FmqServer {
        listener: TcpListener,
        config: ServerConfig,
        context: Arc<ServerContext>,
        factory: Arc<dyn StoreFactory>,
        sessions: Vec<JoinHandle<SessionEnd>>,
    }

    impl FmqServer {
        ///
        /// Start listening.  Port 0 picks any free port; see `local_addr`.
        ///
        pub fn bind(config: ServerConfig, factory: Arc<dyn StoreFactory>) -> Result<FmqServer, ServerError> {
            let addr = format!("{}:{}", config.bind_address, config.port);
            let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
            listener.set_nonblocking(true)?;
            let context = Arc::new(ServerContext::new(&config.instance));
            Ok(FmqServer {
                listener,
                config,
                context,
                factory,
                sessions: Vec::new(),
            })
        }

        pub fn local_addr(&self) -> io::Result<SocketAddr> {
            self.listener.local_addr()
        }

        pub fn context(&self) -> Arc<ServerContext> {
            self.context.clone()
        }

        ///
        /// Accept and serve clients until a SHUTDOWN command arrives or
        /// the server has been idle for `max_quiescent_secs`.  Sessions
        /// still running when this returns are left to finish on their
        /// own threads.
        ///
        pub fn run(&mut self) -> Result<(), ServerError> {
            info!(
                "Instance {} serving queues on {} (max {} clients)",
                self.config.instance,
                self.local_addr()?,
                self.config.max_clients
            );
            loop {
                if self.context.shutdown_requested() {
                    info!("Shutting down on request");
                    break;
                }
                match self.listener.accept() {
                    Ok((stream, peer)) => self.admit(stream, peer),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        self.reap();
                        if self.quiescent() {
                            info!(
                                "No clients for {} seconds, exiting",
                                self.config.max_quiescent_secs
                            );
                            break;
                        }
                        thread::sleep(self.config.poll_interval);
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        error!("accept failed: {}", e);
                        return Err(e.into());
                    }
                }
            }
            self.reap();
            if !self.sessions.is_empty() {
                info!("{} sessions still active at exit", self.sessions.len());
            }
            Ok(())
        }

        fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
            self.context.touch();
            if let Err(e) = stream.set_nonblocking(false) {
                warn!("{}: cannot make socket blocking: {}", peer, e);
                return;
            }
            if self.context.num_clients() >= self.config.max_clients {
                warn!(
                    "{}: denied, already serving {} clients",
                    peer,
                    self.context.num_clients()
                );
                deny(stream, self.config.max_clients);
                return;
            }
            debug!("{}: connected", peer);
            self.context.client_started();

            let name = peer.to_string();
            let session = Session::new(
                &name,
                self.factory.clone(),
                self.context.clone(),
                self.config.session.clone(),
            );
            let context = self.context.clone();
            if self.config.no_threads {
                run_session(session, stream, &context);
                return;
            }
            match thread::Builder::new()
                .name(format!("session-{}", name))
                .spawn(move || run_session(session, stream, &context))
            {
                Ok(handle) => self.sessions.push(handle),
                Err(e) => {
                    error!("{}: cannot start session thread: {}", name, e);
                    self.context.client_finished();
                }
            }
        }

        // Join the session threads that have finished.
        //
        fn reap(&mut self) {
            let (finished, running): (Vec<_>, Vec<_>) =
                self.sessions.drain(..).partition(|h| h.is_finished());
            self.sessions = running;
            for handle in finished {
                if handle.join().is_err() {
                    error!("A session thread panicked");
                    self.context.client_finished();
                }
            }
        }

        fn quiescent(&self) -> bool {
            self.config.max_quiescent_secs > 0
                && self.context.num_clients() == 0
                && self.context.idle_time() >= Duration::from_secs(self.config.max_quiescent_secs)
        }
    }

    fn run_session(mut session: Session, mut stream: TcpStream, context: &ServerContext) -> SessionEnd {
        let end = session.handle_connection(&mut stream);
        match &end {
            SessionEnd::TransportError(e) => warn!("Session ended on transport error: {}", e),
            other => debug!("Session ended: {:?}", other),
        }
        context.client_finished();
        context.touch();
        end
    }

    fn deny(mut stream: TcpStream, max_clients: usize) {
        let reply = framer::encode_status_reply(&StatusReply::ServiceDenied(format!(
            "server is at its limit of {} clients",
            max_clients
        )));
        if let Err(e) = transport::write_frame(&mut stream, DS_SERVER_STATUS_MESSAGE, 0, &reply) {
            debug!("Unable to send denial: {}", e);
        }
    }

}
