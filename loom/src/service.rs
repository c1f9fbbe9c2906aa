//! The contract a worker-hosted actor implements, and the handle ([`Context`])
//! it's given for the duration of one `init`/`dispatch`/`on_exit` call.
//!
//! Mirrors the shape of `neutronium::system::RunSystem` in this workspace - a
//! trait with a required per-call entry point plus optional lifecycle hooks,
//! driven by a borrowed `Context` rather than a direct reference to the owning
//! worker, so a service can never outlive or alias its worker's internals.

use crate::id::{ServiceId, SessionId};
use crate::message::{Message, MessageType};

/// Implemented by every actor type registered with a
/// [`crate::service_pool::ServicePool`].
pub trait Service: Send {
    /// Runs once on the owning worker right after creation. Returning `false`
    /// aborts creation: the service is never inserted into the directory and
    /// the caller receives a failure reply.
    fn init(&mut self, _ctx: &mut Context, _config: &str) -> bool {
        true
    }

    /// Runs once per incoming message, strictly single-threaded with respect
    /// to this service.
    fn dispatch(&mut self, ctx: &mut Context, msg: &Message);

    /// Runs once during teardown, after the service has stopped receiving messages.
    fn on_exit(&mut self, _ctx: &mut Context) {}
}

/// The single channel a [`Service`] has back into its owning worker and the
/// pool, valid only for the duration of the `init`/`dispatch`/`on_exit` call
/// that received it.
pub struct Context<'a> {
    self_id: ServiceId,
    outbox: &'a mut Vec<Outgoing>,
    env: &'a crate::service_pool::EnvTable,
}

/// What a service asked its worker to do as a side effect of the call that
/// just ran, applied by the worker once the call returns. Keeping this as
/// data rather than calling back into the pool directly from `Context` is
/// what lets `dispatch` hold simultaneous borrows of the worker's directory
/// and its local queue - see `service_worker`'s dispatch loop.
pub enum Outgoing {
    Send(Message),
    Broadcast(Message),
    RemoveSelf { crashed: bool },
    ScheduleTimer { delay_ms: u64, repeat: i32, tag: u32 },
    NetworkSend { session: SessionId, payload: crate::buffer::Buffer },
    NetworkClose { session: SessionId },
}

impl<'a> Context<'a> {
    pub fn new(self_id: ServiceId, outbox: &'a mut Vec<Outgoing>, env: &'a crate::service_pool::EnvTable) -> Context<'a> {
        Context { self_id, outbox, env }
    }

    #[inline]
    pub fn self_id(&self) -> ServiceId {
        self.self_id
    }

    /// Sends `payload` to `receiver`. `header`/`session`/`msg_type` populate
    /// the corresponding [`Message`] fields; actual routing (same-worker fast
    /// path vs. cross-worker command queue) is decided by the worker once it
    /// applies this outbox entry.
    pub fn send(
        &mut self,
        receiver: ServiceId,
        payload: crate::buffer::Buffer,
        header: Option<&str>,
        session: Option<SessionId>,
        msg_type: MessageType,
    ) {
        let mut msg = Message::new(msg_type, payload);
        msg.set_sender(self.self_id);
        msg.set_receiver(receiver);
        if let Some(header) = header {
            msg.set_header(header);
        }
        if let Some(session) = session {
            msg.set_session(session);
        }
        self.outbox.push(Outgoing::Send(msg));
    }

    /// Queues a fan-out to every service in the pool except the sender.
    pub fn broadcast(&mut self, payload: crate::buffer::Buffer, msg_type: MessageType) {
        let mut msg = Message::new(msg_type, payload);
        msg.set_sender(self.self_id);
        msg.set_broadcast(true);
        self.outbox.push(Outgoing::Broadcast(msg));
    }

    /// Schedules this service for teardown. If `crashed` is set, a crash
    /// notification is broadcast before `on_exit` runs.
    pub fn remove_self(&mut self, crashed: bool) {
        self.outbox.push(Outgoing::RemoveSelf { crashed });
    }

    /// Builds a reply message addressed back to `sender`, tagged with
    /// `session` so the original requester can correlate it.
    pub fn make_response(
        &self,
        sender: ServiceId,
        header: Option<&str>,
        payload: crate::buffer::Buffer,
        session: Option<SessionId>,
        msg_type: MessageType,
    ) -> Message {
        let mut msg = Message::new(msg_type, payload);
        msg.set_sender(self.self_id);
        msg.set_receiver(sender);
        if let Some(header) = header {
            msg.set_header(header);
        }
        if let Some(session) = session {
            msg.set_session(session);
        }
        msg
    }

    /// Schedules a timer that re-delivers a `System` message to this same
    /// service when it fires, carrying `tag` in the header so the service can
    /// tell its own timers apart. `repeat = -1` repeats forever, `1` fires once.
    pub fn add_timer(&mut self, delay_ms: u64, repeat: i32, tag: u32) {
        self.outbox.push(Outgoing::ScheduleTimer { delay_ms, repeat, tag });
    }

    /// Writes `payload` back out onto `session`, framed the same way as any
    /// other outbound buffer on that connection. The network facade's `send`
    /// is reachable from a service's own worker thread through this queued
    /// side effect rather than a direct call, for the same reason
    /// [`Context::send`] is queued: the worker applies it once `dispatch`
    /// returns, after the borrow on the service directory is released.
    pub fn send_session(&mut self, session: SessionId, payload: crate::buffer::Buffer) {
        self.outbox.push(Outgoing::NetworkSend { session, payload });
    }

    pub fn close_session(&mut self, session: SessionId) {
        self.outbox.push(Outgoing::NetworkClose { session });
    }

    pub fn get_env(&self, key: &str) -> Option<String> {
        self.env.get(key)
    }

    pub fn set_env(&self, key: impl Into<String>, value: impl Into<String>) {
        self.env.set(key, value);
    }
}
