//! Bootstraps the service worker pool, the I/O worker pool, and the logger,
//! then exposes the single surface callers outside a `dispatch` call are
//! meant to use: create a service, send or broadcast a message, touch the env
//! table, open a listener or connection.
//!
//! Grounded on `netcore/core/service_pool.cpp`'s `skynet_start`/global-state
//! entry points, re-expressed per the design notes as an explicit value with a
//! constructor rather than a process-wide singleton - every other component
//! in this crate reaches the shared state ([`PoolShared`]) through a
//! `Runtime`, never through a global.

use crate::buffer::Buffer;
use crate::id::{ServiceId, SessionId};
use crate::message::{Message, MessageType};
use crate::network::Network;
use crate::service::Service;
use crate::service_pool::{PoolShared, ServiceCtor};
use crate::service_worker::{ServiceWorker, WorkerCommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use weave::logging::{self, LogConfig, Logger};

/// Startup parameters for [`Runtime::init`]. `io_worker_num` defaults to
/// `worker_num` when zero, matching the reference's habit of sizing the
/// network thread pool off the same knob as the service thread pool unless
/// told otherwise.
pub struct RuntimeConfig {
    pub worker_num: u8,
    pub io_worker_num: u8,
    pub log: LogConfig,
}

impl Default for RuntimeConfig {
    fn default() -> RuntimeConfig {
        RuntimeConfig {
            worker_num: 4,
            io_worker_num: 0,
            log: LogConfig::default(),
        }
    }
}

enum Stage {
    /// `register_service` may still run; nothing is spawned yet.
    Built {
        worker_rxs: Vec<Receiver<WorkerCommand>>,
    },
    Running {
        worker_handles: Vec<JoinHandle<()>>,
        network: Network,
        pump_stop: Arc<AtomicBool>,
        pump_handle: JoinHandle<()>,
    },
    Stopped,
}

/// The runtime facade: `init` builds every worker and the I/O pool but leaves
/// them unstarted so `register_service` can still run, `run` spawns the
/// worker threads, `stop` tears everything down in the order mandated by the
/// design notes.
pub struct Runtime {
    pool: Arc<PoolShared>,
    worker_num: u8,
    io_worker_num: u8,
    log: Logger,
    stage: Stage,
}

impl Runtime {
    /// Builds the worker command channels and the shared pool state. Workers
    /// are not spawned until [`Runtime::run`].
    pub fn init(config: RuntimeConfig) -> Runtime {
        let log = logging::init(&config.log);
        let worker_num = config.worker_num.max(1);
        let io_worker_num = if config.io_worker_num == 0 { worker_num } else { config.io_worker_num };

        let mut worker_txs = Vec::with_capacity(worker_num as usize);
        let mut worker_rxs = Vec::with_capacity(worker_num as usize);
        for _ in 0..worker_num {
            let (tx, rx) = std::sync::mpsc::channel();
            worker_txs.push(tx);
            worker_rxs.push(rx);
        }

        let pool = Arc::new(PoolShared::new(worker_txs, log.new(logging::o!("component" => "service_pool"))));

        Runtime {
            pool,
            worker_num,
            io_worker_num,
            log,
            stage: Stage::Built { worker_rxs },
        }
    }

    /// Registers a constructor under `type_name` so `new_service` can build
    /// instances of it. Must run before [`Runtime::run`] to guarantee
    /// availability to the first wave of `new_service` calls, though the
    /// registry itself accepts writes at any time.
    pub fn register_service(&self, type_name: impl Into<String>, ctor: ServiceCtor) {
        self.pool.register_type(type_name, ctor);
    }

    /// Marks worker `index` exclusive: `next_worker` skips it for new
    /// services unless every worker is exclusive. Typically used right after
    /// creating a long-running background service that shouldn't share its
    /// worker with whatever `new_service` picks next.
    pub fn set_exclusive(&self, index: u8, exclusive: bool) {
        self.pool.set_exclusive(index, exclusive);
    }

    #[inline]
    pub fn workernum(&self) -> u8 {
        self.worker_num
    }

    pub fn servicenum(&self) -> usize {
        self.pool.total_service_count()
    }

    /// Spawns every service worker thread, the I/O worker pool, and a pump
    /// thread that forwards network events into the service pool by their
    /// stamped receiver id. No-op (logged) if already running.
    pub fn run(&mut self) {
        let worker_rxs = match std::mem::replace(&mut self.stage, Stage::Stopped) {
            Stage::Built { worker_rxs } => worker_rxs,
            other => {
                logging::warn!(self.log, "run() called more than once");
                self.stage = other;
                return;
            }
        };

        let network = Network::start(self.io_worker_num, self.log.new(logging::o!("component" => "network")))
            .expect("failed to start io worker pool");
        let network_handle = network.handle();

        let mut worker_handles = Vec::with_capacity(worker_rxs.len());
        for (index, rx) in worker_rxs.into_iter().enumerate() {
            let pool = Arc::clone(&self.pool);
            let worker_log = self.log.new(logging::o!("service_worker" => index));
            let net = network_handle.clone();
            let handle = std::thread::Builder::new()
                .name(format!("loom-worker-{}", index))
                .spawn(move || {
                    let mut worker = ServiceWorker::new(index as u8, rx, pool, worker_log).with_network(net);
                    worker.run();
                })
                .expect("failed to spawn service worker thread");
            worker_handles.push(handle);
        }

        let pump_stop = Arc::new(AtomicBool::new(false));
        let pump_handle = {
            let pool = Arc::clone(&self.pool);
            let stop = Arc::clone(&pump_stop);
            // `Network` isn't `Send` across this closure by value (the I/O pool
            // owns its own threads already), so the pump only needs the inbox
            // side; route by looping `update` on a short interval instead of
            // moving `network` itself.
            let inbox = network.inbox_handle();
            std::thread::Builder::new()
                .name("loom-network-pump".to_string())
                .spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let drained = inbox.drain(|msg| pool.route_to(msg));
                        if !drained {
                            std::thread::sleep(Duration::from_millis(5));
                        }
                    }
                })
                .expect("failed to spawn network pump thread")
        };

        self.stage = Stage::Running {
            worker_handles,
            network,
            pump_stop,
            pump_handle,
        };
    }

    /// Deterministic shutdown: stop accepting new commands, let every worker
    /// drain to completion and tear its services down in reverse creation
    /// order, then stop the I/O pool (discarding any `network_close` events
    /// it emits in the process, since nothing is left running to receive
    /// them), then join the pump thread.
    pub fn stop(&mut self) {
        let (worker_handles, mut network, pump_stop, pump_handle) = match std::mem::replace(&mut self.stage, Stage::Stopped) {
            Stage::Running {
                worker_handles,
                network,
                pump_stop,
                pump_handle,
            } => (worker_handles, network, pump_stop, pump_handle),
            other => {
                self.stage = other;
                return;
            }
        };

        self.pool.shutdown_all_workers();
        for handle in worker_handles {
            let _ = handle.join();
        }

        network.stop();

        pump_stop.store(true, Ordering::Relaxed);
        let _ = pump_handle.join();

        logging::info!(self.log, "runtime stopped");
    }

    /// Resolves `type_name`, picks a worker (`worker_hint` if given, else the
    /// pool's `next_worker` policy), and blocks until that worker replies
    /// with the new id or a failure reason.
    pub fn new_service(
        &self,
        type_name: &str,
        unique_name: Option<String>,
        config: impl Into<String>,
        worker_hint: Option<u8>,
    ) -> crate::error::Result<ServiceId> {
        self.pool.new_service(type_name, unique_name, config.into(), worker_hint)
    }

    /// Sends `payload` to `receiver` as if from the system (sender id `0`).
    pub fn send(
        &self,
        receiver: ServiceId,
        payload: Buffer,
        header: Option<&str>,
        session: Option<SessionId>,
        msg_type: MessageType,
    ) {
        let mut msg = Message::new(msg_type, payload);
        msg.set_receiver(receiver);
        if let Some(header) = header {
            msg.set_header(header);
        }
        if let Some(session) = session {
            msg.set_session(session);
        }
        self.pool.route_to(msg);
    }

    /// Fans `payload` out to every service in the runtime.
    pub fn broadcast(&self, payload: Buffer, msg_type: MessageType) {
        let mut msg = Message::new(msg_type, payload);
        msg.set_broadcast(true);
        self.pool.broadcast(msg);
    }

    /// Builds a reply `from` → `to`, tagged with `session` so the original
    /// caller can correlate it - the facade-level counterpart to
    /// [`crate::service::Context::make_response`] for replies constructed
    /// outside of a `dispatch` call.
    pub fn make_response(
        &self,
        from: ServiceId,
        to: ServiceId,
        header: Option<&str>,
        payload: Buffer,
        session: Option<SessionId>,
        msg_type: MessageType,
    ) -> Message {
        let mut msg = Message::new(msg_type, payload);
        msg.set_sender(from);
        msg.set_receiver(to);
        if let Some(header) = header {
            msg.set_header(header);
        }
        if let Some(session) = session {
            msg.set_session(session);
        }
        msg
    }

    pub fn get_env(&self, key: &str) -> Option<String> {
        self.pool.env().get(key)
    }

    pub fn set_env(&self, key: impl Into<String>, value: impl Into<String>) {
        self.pool.env().set(key, value);
    }

    pub fn get_unique_service(&self, name: &str) -> Option<ServiceId> {
        self.pool.get_unique_service(name)
    }

    /// Directly claims `name` for `id`, bypassing `new_service`'s creation
    /// path. Returns `false` if the name is already taken.
    pub fn set_unique_service(&self, name: &str, id: ServiceId) -> bool {
        self.pool.try_register_unique(name, id)
    }

    /// Opens a listener on `ip:port`; its `network_connect`/`network_recv`/
    /// `network_close` events are delivered to `owner` through the same
    /// dispatch path as any other message.
    pub fn listen(&self, owner: ServiceId, ip: &str, port: u16, idle_timeout: Option<Duration>) -> std::io::Result<()> {
        self.network().listen(owner, ip, port, idle_timeout)
    }

    /// Like [`Runtime::listen`] but blocks for the bound address - the way to
    /// discover which port an ephemeral (`port = 0`) listener landed on.
    pub fn listen_sync(&self, owner: ServiceId, ip: &str, port: u16, idle_timeout: Option<Duration>) -> std::io::Result<std::net::SocketAddr> {
        self.network().listen_sync(owner, ip, port, idle_timeout)
    }

    pub fn async_connect(&self, owner: ServiceId, ip: &str, port: u16, idle_timeout: Option<Duration>) -> std::io::Result<()> {
        self.network().async_connect(owner, ip, port, idle_timeout)
    }

    pub fn sync_connect(&self, owner: ServiceId, ip: &str, port: u16, idle_timeout: Option<Duration>) -> std::io::Result<SessionId> {
        self.network().sync_connect(owner, ip, port, idle_timeout)
    }

    pub fn send_session(&self, session: SessionId, payload: Buffer) {
        self.network().send(session, payload);
    }

    pub fn close_session(&self, session: SessionId) {
        self.network().close(session);
    }

    fn network(&self) -> &Network {
        match &self.stage {
            Stage::Running { network, .. } => network,
            _ => panic!("network operation attempted before Runtime::run() or after Runtime::stop()"),
        }
    }
}

/// Convenience used by tests and small binaries: a boxed constructor closure
/// turned into the `Arc<dyn Fn() -> Box<dyn Service>>` the registry expects.
pub fn ctor<S, F>(f: F) -> ServiceCtor
where
    S: Service + 'static,
    F: Fn() -> S + Send + Sync + 'static,
{
    Arc::new(move || Box::new(f()) as Box<dyn Service>)
}
