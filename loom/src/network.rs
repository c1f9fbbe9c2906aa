//! Public networking facade: `listen`/`async_connect`/`sync_connect`/`send`/`close`
//! plus `update()` to drain inbound network events into a caller-supplied handler.
//! Grounded on `netcore/components/tcp/network.h`'s `network` class, which wraps
//! a vector of `io_worker`s behind exactly this surface.

use crate::id::{ServiceId, SessionId};
use crate::io_pool::IoPool;
use crate::message::{Message, MessageSink};
use crate::queue::BoundedQueue;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use weave::logging::Logger;

const DEFAULT_INBOX_CAPACITY: usize = 8192;

struct Inbox {
    queue: BoundedQueue<Message>,
}

impl MessageSink for Inbox {
    /// Stamps the event's receiver with `owner` before queueing it - the I/O
    /// worker only knows which service asked for this listener/connection,
    /// not how the runtime wants it routed, so that decision is made here,
    /// once, rather than duplicated at every call site of `update`.
    fn dispatch(&self, owner: ServiceId, mut msg: Message) {
        msg.set_receiver(owner);
        self.queue.push(msg);
    }
}

pub struct Network {
    pool: IoPool,
    inbox: Arc<Inbox>,
}

/// A cheap, cloneable handle to [`Network`]'s inbound event queue, separate
/// from the I/O pool handles so a dedicated pump thread can drain it without
/// needing `Network` itself (whose `IoPool` owns non-cloneable thread join
/// handles).
#[derive(Clone)]
pub struct InboxHandle(Arc<Inbox>);

impl InboxHandle {
    /// Drains whatever has queued since the last call, invoking `handler` on
    /// each in arrival order. Returns whether anything was drained.
    pub fn drain<F: FnMut(Message)>(&self, mut handler: F) -> bool {
        let drained = self.0.queue.drain();
        let any = !drained.is_empty();
        for msg in drained {
            handler(msg);
        }
        any
    }
}

impl Network {
    pub fn start(worker_count: u8, log: Logger) -> std::io::Result<Network> {
        let inbox = Arc::new(Inbox {
            queue: BoundedQueue::new(DEFAULT_INBOX_CAPACITY),
        });
        let pool = IoPool::start(worker_count, inbox.clone() as Arc<dyn MessageSink>, log)?;
        Ok(Network { pool, inbox })
    }

    /// Opens a listener whose `network_connect`/`network_recv`/`network_close`
    /// events are attributed to `owner` - the service that should receive them.
    pub fn listen(&self, owner: ServiceId, ip: &str, port: u16, idle_timeout: Option<Duration>) -> std::io::Result<()> {
        let addr = resolve(ip, port)?;
        self.pool.listen(owner, addr, idle_timeout);
        Ok(())
    }

    /// Like [`Network::listen`] but blocks until the owning I/O worker has
    /// bound the socket, returning the actual local address - the only way
    /// to learn which port an ephemeral (`port = 0`) listener landed on.
    pub fn listen_sync(&self, owner: ServiceId, ip: &str, port: u16, idle_timeout: Option<Duration>) -> std::io::Result<SocketAddr> {
        let addr = resolve(ip, port)?;
        self.pool.listen_sync(owner, addr, idle_timeout)
    }

    pub fn async_connect(&self, owner: ServiceId, ip: &str, port: u16, idle_timeout: Option<Duration>) -> std::io::Result<()> {
        let addr = resolve(ip, port)?;
        self.pool.connect(owner, addr, idle_timeout);
        Ok(())
    }

    /// Connects on the calling thread and blocks until the owning I/O worker
    /// has registered the session, returning its id directly rather than
    /// through a `network_connect` event.
    pub fn sync_connect(&self, owner: ServiceId, ip: &str, port: u16, idle_timeout: Option<Duration>) -> std::io::Result<SessionId> {
        let addr = resolve(ip, port)?;
        self.pool
            .connect_sync(owner, addr, idle_timeout)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "io worker shut down before registering session"))
    }

    pub fn send(&self, session: SessionId, payload: crate::buffer::Buffer) {
        self.pool.send(session, payload);
    }

    pub fn close(&self, session: SessionId) {
        self.pool.close(session);
    }

    /// Drains whatever network events have arrived since the last call and
    /// invokes `handler` on each, in arrival order.
    pub fn update<F: FnMut(Message)>(&self, mut handler: F) {
        for msg in self.inbox.queue.drain() {
            handler(msg);
        }
    }

    pub fn stop(&mut self) {
        self.pool.stop();
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    pub fn inbox_handle(&self) -> InboxHandle {
        InboxHandle(Arc::clone(&self.inbox))
    }

    /// A cheap, cloneable `send`/`close` handle - see [`crate::io_pool::IoPoolHandle`].
    pub fn handle(&self) -> crate::io_pool::IoPoolHandle {
        self.pool.handle()
    }
}

fn resolve(ip: &str, port: u16) -> std::io::Result<SocketAddr> {
    (ip, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no address resolved"))
}
