//! Round-robins new listeners/connects across a fixed set of I/O worker
//! threads and routes `send`/`close` by the session id's worker index.
//! Grounded on `netcore/components/tcp/network.h`'s `network` class, which
//! holds a vector of `io_worker`s and dispatches to `sessionid >> IO_WORKER_ID_SHIFT`.

use crate::id::{ServiceId, SessionId};
use crate::io_worker::{IoCommand, IoWorker};
use crate::message::MessageSink;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use weave::logging::Logger;

pub struct IoPool {
    senders: Vec<Sender<IoCommand>>,
    handles: Vec<JoinHandle<()>>,
    next_rr: AtomicUsize,
}

impl IoPool {
    /// Spawns `worker_count` I/O worker threads, each delivering network
    /// events to `sink`.
    pub fn start(worker_count: u8, sink: Arc<dyn MessageSink>, log: Logger) -> std::io::Result<IoPool> {
        let mut senders = Vec::with_capacity(worker_count as usize);
        let mut handles = Vec::with_capacity(worker_count as usize);

        for index in 0..worker_count {
            let worker_log = log.new(weave::logging::o!("io_worker" => index));
            let (mut worker, tx) = IoWorker::new(index, Arc::clone(&sink), worker_log)?;
            let handle = std::thread::Builder::new()
                .name(format!("loom-io-{}", index))
                .spawn(move || worker.run())
                .expect("failed to spawn io worker thread");
            senders.push(tx);
            handles.push(handle);
        }

        Ok(IoPool {
            senders,
            handles,
            next_rr: AtomicUsize::new(0),
        })
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    fn next_worker(&self) -> usize {
        self.next_rr.fetch_add(1, Ordering::Relaxed) % self.senders.len()
    }

    pub fn listen(&self, owner: ServiceId, addr: SocketAddr, timeout: Option<Duration>) {
        let worker = self.next_worker();
        let _ = self.senders[worker].send(IoCommand::Listen {
            owner,
            addr,
            timeout,
            reply: None,
        });
    }

    /// Like [`IoPool::listen`] but blocks the calling thread for the bound
    /// address, so a caller that asked for an ephemeral `:0` port can learn
    /// which port it actually got.
    pub fn listen_sync(&self, owner: ServiceId, addr: SocketAddr, timeout: Option<Duration>) -> std::io::Result<SocketAddr> {
        let worker = self.next_worker();
        let (tx, rx) = std::sync::mpsc::channel();
        let _ = self.senders[worker].send(IoCommand::Listen {
            owner,
            addr,
            timeout,
            reply: Some(tx),
        });
        rx.recv()
            .unwrap_or_else(|_| Err(std::io::Error::new(std::io::ErrorKind::Other, "io worker shut down before binding listener")))
    }

    pub fn connect(&self, owner: ServiceId, addr: SocketAddr, timeout: Option<Duration>) {
        let worker = self.next_worker();
        let _ = self.senders[worker].send(IoCommand::Connect {
            owner,
            addr,
            timeout,
            reply: None,
        });
    }

    /// Like [`IoPool::connect`] but blocks the calling thread until the
    /// chosen I/O worker has registered the session and assigned it an id.
    pub fn connect_sync(&self, owner: ServiceId, addr: SocketAddr, timeout: Option<Duration>) -> Option<SessionId> {
        let worker = self.next_worker();
        let (tx, rx) = std::sync::mpsc::channel();
        let _ = self.senders[worker].send(IoCommand::Connect {
            owner,
            addr,
            timeout,
            reply: Some(tx),
        });
        rx.recv().ok()
    }

    pub fn send(&self, session: SessionId, payload: crate::buffer::Buffer) {
        let worker = session.worker_index() as usize;
        if let Some(sender) = self.senders.get(worker) {
            let _ = sender.send(IoCommand::Send { session, payload });
        }
    }

    pub fn close(&self, session: SessionId) {
        let worker = session.worker_index() as usize;
        if let Some(sender) = self.senders.get(worker) {
            let _ = sender.send(IoCommand::Close { session });
        }
    }

    /// Stops every I/O worker and waits for its thread to exit. Sessions are
    /// closed as each worker unwinds its own directory.
    pub fn stop(&mut self) {
        for sender in &self.senders {
            let _ = sender.send(IoCommand::Shutdown);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// A cheap, cloneable `send`/`close` handle, independent of the join
    /// handles this pool itself owns - this is what lets a
    /// [`crate::service_worker::ServiceWorker`] write back onto a session
    /// from within a service's `dispatch` without holding the whole pool.
    pub fn handle(&self) -> IoPoolHandle {
        IoPoolHandle {
            senders: self.senders.clone(),
        }
    }
}

#[derive(Clone)]
pub struct IoPoolHandle {
    senders: Vec<Sender<IoCommand>>,
}

impl IoPoolHandle {
    pub fn send(&self, session: SessionId, payload: crate::buffer::Buffer) {
        let worker = session.worker_index() as usize;
        if let Some(sender) = self.senders.get(worker) {
            let _ = sender.send(IoCommand::Send { session, payload });
        }
    }

    pub fn close(&self, session: SessionId) {
        let worker = session.worker_index() as usize;
        if let Some(sender) = self.senders.get(worker) {
            let _ = sender.send(IoCommand::Close { session });
        }
    }
}
