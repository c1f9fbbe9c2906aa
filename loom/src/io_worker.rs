//! A single reactor thread owning a set of TCP listeners and sessions.
//!
//! Grounded on `netcore/components/tcp/impl/io_worker.{h,cpp}`: every
//! operation arrives as a posted command rather than running on the caller's
//! thread, sessions live in one directory keyed by id, and a periodic sweep
//! closes idle ones. The split into a dedicated listener poll and a dedicated
//! session poll follows `neutronium::net::endpoint::Endpoint`'s multi-poll
//! staging in this same workspace, adapted from its handshake/live split to a
//! simpler listen/session split since this protocol has no handshake stage.

use crate::id::{ServiceId, SequenceAllocator, SessionId};
use crate::message::MessageSink;
use crate::session::{Session, SessionState};
use mio::net::{TcpListener, TcpStream};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weave::logging::{self, Logger};

const POLL_TIMEOUT: Duration = Duration::from_millis(10);
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

pub enum IoCommand {
    Listen {
        owner: ServiceId,
        addr: SocketAddr,
        timeout: Option<Duration>,
        /// Set by `listen_sync` so an ephemeral `:0` port's actual bound
        /// address can be recovered immediately, the same way `Connect`'s
        /// `reply` hands a `sync_connect` caller its session id.
        reply: Option<Sender<std::io::Result<SocketAddr>>>,
    },
    Connect {
        owner: ServiceId,
        addr: SocketAddr,
        timeout: Option<Duration>,
        /// Set by `sync_connect` so the caller gets the assigned id back
        /// immediately; `async_connect` leaves this `None`.
        reply: Option<Sender<SessionId>>,
    },
    Send {
        session: SessionId,
        payload: crate::buffer::Buffer,
    },
    Close {
        session: SessionId,
    },
    Remove {
        session: SessionId,
    },
    Shutdown,
}

struct Listener {
    owner: ServiceId,
    socket: TcpListener,
    timeout: Option<Duration>,
}

/// Owns one reactor, one session directory, and the periodic idle sweep for
/// all sessions it hosts. Runs entirely on its own thread via [`IoWorker::run`].
pub struct IoWorker {
    index: u8,
    listen_poll: mio::Poll,
    listen_events: mio::Events,
    listeners: HashMap<mio::Token, Listener>,
    next_listener_token: usize,

    session_poll: mio::Poll,
    session_events: mio::Events,
    sessions: HashMap<u32, Session>,
    alloc: SequenceAllocator,

    commands: Receiver<IoCommand>,
    sink: Arc<dyn MessageSink>,
    last_sweep: Instant,
    running: bool,
    log: Logger,
}

impl IoWorker {
    pub fn new(index: u8, sink: Arc<dyn MessageSink>, log: Logger) -> std::io::Result<(IoWorker, Sender<IoCommand>)> {
        let (tx, rx) = std::sync::mpsc::channel();
        let worker = IoWorker {
            index,
            listen_poll: mio::Poll::new()?,
            listen_events: mio::Events::with_capacity(256),
            listeners: HashMap::new(),
            next_listener_token: 0,
            session_poll: mio::Poll::new()?,
            session_events: mio::Events::with_capacity(4096),
            sessions: HashMap::new(),
            alloc: SequenceAllocator::new(),
            commands: rx,
            sink,
            last_sweep: Instant::now(),
            running: true,
            log,
        };
        Ok((worker, tx))
    }

    #[inline]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Runs until a [`IoCommand::Shutdown`] is processed. Intended to be the
    /// entire body of this worker's dedicated OS thread.
    pub fn run(&mut self) {
        while self.running {
            self.drain_commands();
            self.poll_listeners();
            self.poll_sessions();
            self.sweep_idle();
        }
        self.close_all();
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(_) => break,
            }
        }
    }

    fn handle_command(&mut self, cmd: IoCommand) {
        match cmd {
            IoCommand::Listen { owner, addr, timeout, reply } => self.listen(owner, addr, timeout, reply),
            IoCommand::Connect { owner, addr, timeout, reply } => self.connect(owner, addr, timeout, reply),
            IoCommand::Send { session, payload } => self.send(session, payload),
            IoCommand::Close { session } => self.close(session),
            IoCommand::Remove { session } => {
                self.sessions.remove(&session.raw());
            }
            IoCommand::Shutdown => self.running = false,
        }
    }

    fn listen(&mut self, owner: ServiceId, addr: SocketAddr, timeout: Option<Duration>, reply: Option<Sender<std::io::Result<SocketAddr>>>) {
        let socket = match TcpListener::bind(&addr) {
            Ok(socket) => socket,
            Err(err) => {
                logging::error!(self.log, "listen failed"; "addr" => %addr, "error" => %err);
                if let Some(reply) = reply {
                    let _ = reply.send(Err(err));
                }
                return;
            }
        };

        let token = mio::Token(self.next_listener_token);
        self.next_listener_token += 1;

        if let Err(err) = self
            .listen_poll
            .register(&socket, token, mio::Ready::readable(), mio::PollOpt::edge())
        {
            logging::error!(self.log, "listener registration failed"; "addr" => %addr, "error" => %err);
            if let Some(reply) = reply {
                let _ = reply.send(Err(err));
            }
            return;
        }

        let bound_addr = socket.local_addr().unwrap_or(addr);
        logging::info!(self.log, "listening"; "addr" => %bound_addr);
        self.listeners.insert(token, Listener { owner, socket, timeout });
        if let Some(reply) = reply {
            let _ = reply.send(Ok(bound_addr));
        }
    }

    fn connect(&mut self, owner: ServiceId, addr: SocketAddr, timeout: Option<Duration>, reply: Option<Sender<SessionId>>) {
        let stream = match TcpStream::connect(&addr) {
            Ok(stream) => stream,
            Err(err) => {
                logging::error!(self.log, "connect failed"; "addr" => %addr, "error" => %err);
                return;
            }
        };

        let id = self.alloc_id();
        if let Err(err) = self.session_poll.register(
            &stream,
            mio::Token(id.raw() as usize),
            mio::Ready::readable() | mio::Ready::writable(),
            mio::PollOpt::edge(),
        ) {
            logging::error!(self.log, "session registration failed"; "addr" => %addr, "error" => %err);
            return;
        }

        let session = Session::new(id, owner, stream, SessionState::Connecting, timeout, self.log.clone());
        self.sessions.insert(id.raw(), session);
        if let Some(reply) = reply {
            let _ = reply.send(id);
        }
    }

    fn alloc_id(&mut self) -> SessionId {
        let worker_index = self.index;
        let sessions = &self.sessions;
        let sequence = self.alloc.alloc(|candidate| sessions.contains_key(&SessionId::new(worker_index, candidate).raw()));
        SessionId::new(worker_index, sequence)
    }

    fn poll_listeners(&mut self) {
        if self.listen_poll.poll(&mut self.listen_events, Some(Duration::from_millis(0))).is_err() {
            return;
        }

        let mut accepted = Vec::new();
        for event in &self.listen_events {
            if let Some(listener) = self.listeners.get(&event.token()) {
                loop {
                    match listener.socket.accept() {
                        Ok((stream, peer)) => accepted.push((listener.owner, listener.timeout, stream, peer)),
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(err) => {
                            logging::error!(self.log, "accept failed"; "error" => %err);
                            break;
                        }
                    }
                }
            }
        }

        for (owner, timeout, stream, peer) in accepted {
            let id = self.alloc_id();
            if let Err(err) = self.session_poll.register(
                &stream,
                mio::Token(id.raw() as usize),
                mio::Ready::readable() | mio::Ready::writable(),
                mio::PollOpt::edge(),
            ) {
                logging::error!(self.log, "accepted session registration failed"; "peer" => %peer, "error" => %err);
                continue;
            }
            let mut session = Session::new(id, owner, stream, SessionState::Open, timeout, self.log.clone());
            let connect_msg = session.connected();
            self.sink.dispatch(owner, connect_msg);
            self.sessions.insert(id.raw(), session);
        }
    }

    fn poll_sessions(&mut self) {
        if self
            .session_poll
            .poll(&mut self.session_events, Some(POLL_TIMEOUT))
            .is_err()
        {
            return;
        }

        for event in &self.session_events {
            let raw = event.token().0 as u32;
            let readiness = event.readiness();

            let (owner, events) = match self.sessions.get_mut(&raw) {
                Some(session) => {
                    let was_connecting = session.state() == SessionState::Connecting;
                    let mut events = Vec::new();

                    if was_connecting && readiness.is_writable() {
                        match session.stream().take_error() {
                            Ok(None) => events.push(session.connected()),
                            _ => events.push(session.close()),
                        }
                    }

                    if session.state() == SessionState::Open {
                        if readiness.is_readable() {
                            events.extend(session.on_readable());
                        }
                        if readiness.is_writable() {
                            events.extend(session.on_writable());
                        }
                    }

                    (session.owner(), events)
                }
                None => continue,
            };

            let done = events.iter().any(|m| m.msg_type() == crate::message::MessageType::NetworkClose);
            for msg in events {
                self.sink.dispatch(owner, msg);
            }
            if done {
                self.sessions.remove(&raw);
            }
        }
    }

    fn sweep_idle(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_sweep) < IDLE_SWEEP_INTERVAL {
            return;
        }
        self.last_sweep = now;

        let mut expired = Vec::new();
        for (raw, session) in self.sessions.iter_mut() {
            if let Some(msg) = session.check_idle(now) {
                expired.push((*raw, session.owner(), msg));
            }
        }
        for (raw, owner, msg) in expired {
            self.sink.dispatch(owner, msg);
            if let Some(session) = self.sessions.get_mut(&raw) {
                let close_msg = session.close();
                self.sink.dispatch(owner, close_msg);
            }
            self.sessions.remove(&raw);
        }
    }

    fn send(&mut self, id: SessionId, payload: crate::buffer::Buffer) {
        if let Some(session) = self.sessions.get_mut(&id.raw()) {
            if let Err(category) = session.send(payload) {
                let owner = session.owner();
                self.sink.dispatch(owner, crate::message::Message::network_logic_error(id, category));
                let close_msg = session.close();
                self.sink.dispatch(owner, close_msg);
                self.sessions.remove(&id.raw());
            }
        }
    }

    fn close(&mut self, id: SessionId) {
        if let Some(mut session) = self.sessions.remove(&id.raw()) {
            let owner = session.owner();
            let msg = session.close();
            self.sink.dispatch(owner, msg);
        }
    }

    fn close_all(&mut self) {
        let ids: Vec<u32> = self.sessions.keys().copied().collect();
        for raw in ids {
            if let Some(mut session) = self.sessions.remove(&raw) {
                let owner = session.owner();
                let msg = session.close();
                self.sink.dispatch(owner, msg);
            }
        }
    }
}
