//! The hardest subsystem: one OS thread cooperatively running every service
//! it owns. Grounded on `netcore/core/service_pool.cpp`'s worker loop (drain
//! commands, drain the message queue with a per-service fairness bound,
//! advance timers, tear down exiting services, park) and on this workspace's
//! disjoint-field-borrow style (`neutronium::world`) for letting `dispatch`
//! touch both the local queue and the directory without any unsafe code -
//! every step below takes explicit `&mut` references to individual
//! `ServiceWorker` fields rather than a single `&mut self` method, so the
//! borrow checker can see they don't alias.

use crate::id::{SequenceAllocator, ServiceId};
use crate::io_pool::IoPoolHandle;
use crate::message::{Message, MessageType};
use crate::service::{Context, Outgoing, Service};
use crate::service_pool::PoolShared;
use crate::timer::TimerWheel;
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weave::logging::{self, Logger};

/// Per-service-per-iteration dispatch bound. A service with more than this
/// many messages waiting keeps the rest queued for the next iteration rather
/// than starving its neighbors.
pub const FAIRNESS_BOUND: usize = 128;
const PARK_TIMEOUT: Duration = Duration::from_millis(10);

pub enum CreateReply {
    Created(ServiceId),
    Failed(String),
}

/// Extracts a human-readable message out of a `catch_unwind` payload - panics
/// via `panic!("...")`/`format!` carry a `&str` or `String`, anything else
/// (a custom payload passed to `std::panic::resume_unwind`) falls back to a
/// generic label.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "service panicked with a non-string payload".to_string()
    }
}

pub enum WorkerCommand {
    Create {
        ctor: crate::service_pool::ServiceCtor,
        unique_name: Option<String>,
        config: String,
        reply: Sender<CreateReply>,
    },
    Remove(ServiceId),
    Inject(Message),
    Shutdown,
}

struct Slot {
    service: Box<dyn Service>,
    unique_name: Option<String>,
    exiting: bool,
}

/// Owns every [`Service`] assigned to this worker plus the two queues
/// described in the design notes: the externally-posted command queue and the
/// internal same-worker fast-path message queue.
pub struct ServiceWorker {
    index: u8,
    directory: IndexMap<ServiceId, Slot>,
    local_queue: VecDeque<Message>,
    commands: Receiver<WorkerCommand>,
    alloc: SequenceAllocator,
    timers: TimerWheel,
    last_tick: Instant,
    pool: Arc<PoolShared>,
    network: Option<IoPoolHandle>,
    running: bool,
    log: Logger,
}

impl ServiceWorker {
    pub fn new(index: u8, commands: Receiver<WorkerCommand>, pool: Arc<PoolShared>, log: Logger) -> ServiceWorker {
        ServiceWorker {
            index,
            directory: IndexMap::new(),
            local_queue: VecDeque::new(),
            commands,
            alloc: SequenceAllocator::new(),
            timers: TimerWheel::new(),
            last_tick: Instant::now(),
            pool,
            network: None,
            running: true,
            log,
        }
    }

    /// Gives this worker a handle to write back onto sessions from within
    /// `dispatch` (`Context::send_session`/`close_session`). Workers with no
    /// handle set simply log and drop those outbox entries - a worker that
    /// never hosts network-facing services has no use for one.
    pub fn with_network(mut self, network: IoPoolHandle) -> ServiceWorker {
        self.network = Some(network);
        self
    }

    #[inline]
    pub fn service_count(&self) -> usize {
        self.directory.len()
    }

    /// Runs the dispatch loop until a [`WorkerCommand::Shutdown`] is
    /// processed, at which point every remaining service is torn down in
    /// reverse creation order.
    pub fn run(&mut self) {
        while self.running {
            self.drain_commands();
            self.drain_messages();
            self.advance_timers();
            self.teardown_exiting();

            if self.local_queue.is_empty() {
                if let Ok(cmd) = self.commands.recv_timeout(PARK_TIMEOUT) {
                    self.handle_command(cmd);
                }
            }
        }
        self.shutdown_all();
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(_) => break,
            }
        }
    }

    fn handle_command(&mut self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::Create {
                ctor,
                unique_name,
                config,
                reply,
            } => self.create_service(ctor, unique_name, config, reply),
            WorkerCommand::Remove(id) => {
                if let Some(slot) = self.directory.get_mut(&id) {
                    slot.exiting = true;
                }
            }
            WorkerCommand::Inject(msg) => self.local_queue.push_back(msg),
            WorkerCommand::Shutdown => self.running = false,
        }
    }

    fn create_service(
        &mut self,
        ctor: crate::service_pool::ServiceCtor,
        unique_name: Option<String>,
        config: String,
        reply: Sender<CreateReply>,
    ) {
        let directory = &self.directory;
        let worker_index = self.index;
        let sequence = self.alloc.alloc(|candidate| directory.contains_key(&ServiceId::new(worker_index, candidate)));
        let id = ServiceId::new(worker_index, sequence);

        let mut service = ctor();
        let mut outbox = Vec::new();
        let env = self.pool.env();
        let mut ctx = Context::new(id, &mut outbox, env);
        let ok = service.init(&mut ctx, &config);

        if !ok {
            logging::warn!(self.log, "service init failed"; "id" => %id);
            let _ = reply.send(CreateReply::Failed("init returned false".to_string()));
            return;
        }

        if let Some(name) = &unique_name {
            if !self.pool.try_register_unique(name, id) {
                logging::warn!(self.log, "duplicate unique service"; "name" => name, "id" => %id);
                let _ = reply.send(CreateReply::Failed(format!("unique service `{}` already exists", name)));
                return;
            }
        }

        self.directory.insert(
            id,
            Slot {
                service,
                unique_name,
                exiting: false,
            },
        );
        self.pool.note_service_created(self.index);
        self.apply_outbox(outbox, id);
        let _ = reply.send(CreateReply::Created(id));
    }

    fn drain_messages(&mut self) {
        let mut counts: std::collections::HashMap<ServiceId, usize> = std::collections::HashMap::new();
        let mut deferred = VecDeque::new();
        let mut to_dispatch = std::mem::take(&mut self.local_queue);

        while let Some(msg) = to_dispatch.pop_front() {
            let receiver = msg.receiver();

            if msg.is_broadcast() {
                self.deliver_broadcast(&msg);
                continue;
            }

            let count = counts.entry(receiver).or_insert(0);
            if *count >= FAIRNESS_BOUND {
                deferred.push_back(msg);
                continue;
            }
            *count += 1;

            self.dispatch_one(receiver, &msg);
        }

        deferred.append(&mut self.local_queue);
        self.local_queue = deferred;
    }

    fn deliver_broadcast(&mut self, msg: &Message) {
        let sender = msg.sender();
        let targets: Vec<ServiceId> = self.directory.keys().copied().filter(|id| *id != sender).collect();
        for id in targets {
            self.dispatch_one(id, msg);
        }
    }

    /// Runs one `dispatch` call, catching a panic at this boundary the way
    /// `spec.md` §7 requires ("a fault during dispatch is caught at the
    /// worker boundary; a crash notification is broadcast and the service is
    /// scheduled for removal; the worker continues") rather than letting it
    /// unwind into `run`'s loop and take the whole thread down with it.
    fn dispatch_one(&mut self, receiver: ServiceId, msg: &Message) {
        let slot = match self.directory.get_mut(&receiver) {
            Some(slot) if !slot.exiting => slot,
            _ => {
                logging::warn!(self.log, "dropping message for unknown/exiting service"; "receiver" => %receiver);
                return;
            }
        };

        let mut outbox = Vec::new();
        let env = self.pool.env();
        let mut ctx = Context::new(receiver, &mut outbox, env);
        let service = &mut slot.service;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            service.dispatch(&mut ctx, msg);
        }));

        match result {
            Ok(()) => self.apply_outbox(outbox, receiver),
            Err(panic) => {
                let reason = panic_message(&panic);
                logging::error!(self.log, "service panicked during dispatch"; "id" => %receiver, "panic" => %reason);
                // Any outbox entries queued before the panic are still applied -
                // they represent completed side effects the service committed to
                // before the fault, same as a `RemoveSelf { crashed: true }` call
                // would have produced deliberately.
                self.apply_outbox(outbox, receiver);
                if let Some(slot) = self.directory.get_mut(&receiver) {
                    slot.exiting = true;
                }
                let mut crash_msg = Message::new(MessageType::System, crate::buffer::Buffer::from_slice(reason.as_bytes(), 0));
                crash_msg.set_sender(receiver);
                crash_msg.set_broadcast(true);
                self.pool.broadcast(crash_msg);
            }
        }
    }

    fn apply_outbox(&mut self, outbox: Vec<Outgoing>, from: ServiceId) {
        for item in outbox {
            match item {
                Outgoing::Send(msg) => self.route(msg),
                Outgoing::Broadcast(msg) => self.pool.broadcast(msg),
                Outgoing::RemoveSelf { crashed } => {
                    if crashed {
                        let mut crash_msg = Message::new(MessageType::System, crate::buffer::Buffer::from_slice(b"crash", 0));
                        crash_msg.set_sender(from);
                        crash_msg.set_broadcast(true);
                        self.pool.broadcast(crash_msg);
                    }
                    if let Some(slot) = self.directory.get_mut(&from) {
                        slot.exiting = true;
                    }
                }
                Outgoing::ScheduleTimer { delay_ms, repeat, tag } => {
                    let callback = crate::timer::CallbackTag { owner: from.raw(), tag };
                    if repeat == 1 {
                        self.timers.add_once(delay_ms, callback);
                    } else {
                        self.timers.add_repeat(delay_ms, repeat, callback);
                    }
                }
                Outgoing::NetworkSend { session, payload } => match &self.network {
                    Some(network) => network.send(session, payload),
                    None => logging::warn!(self.log, "send_session called on a worker with no network handle"; "session" => %session),
                },
                Outgoing::NetworkClose { session } => match &self.network {
                    Some(network) => network.close(session),
                    None => logging::warn!(self.log, "close_session called on a worker with no network handle"; "session" => %session),
                },
            }
        }
    }

    /// Routes a message either straight onto this worker's own queue (the
    /// fast path, no cross-thread synchronization) or across to the owning
    /// worker's command queue, decided purely by the receiver id's packed
    /// worker index.
    fn route(&mut self, msg: Message) {
        if msg.receiver().worker_index() == self.index {
            self.local_queue.push_back(msg);
        } else {
            self.pool.route_to(msg);
        }
    }

    fn advance_timers(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        let fired = self.timers.update(elapsed.as_millis() as u64);
        for timer in fired {
            let owner = ServiceId::from(timer.callback.owner);
            let mut msg = Message::new(MessageType::System, crate::buffer::Buffer::new());
            msg.set_receiver(owner);
            msg.set_header(format!("timer:{}", timer.callback.tag));
            self.local_queue.push_back(msg);
        }
    }

    fn teardown_exiting(&mut self) {
        let exiting: Vec<ServiceId> = self
            .directory
            .iter()
            .filter(|(_, slot)| slot.exiting)
            .map(|(id, _)| *id)
            .collect();

        for id in exiting {
            if let Some(mut slot) = self.directory.shift_remove(&id) {
                let mut outbox = Vec::new();
                let env = self.pool.env();
                let mut ctx = Context::new(id, &mut outbox, env);
                slot.service.on_exit(&mut ctx);
                if let Some(name) = &slot.unique_name {
                    self.pool.clear_unique(name);
                }
                self.pool.note_service_destroyed(self.index);
                logging::debug!(self.log, "service exited"; "id" => %id);
            }
        }
    }

    /// Final shutdown teardown: every remaining service, in reverse creation
    /// order, regardless of whether it was marked exiting.
    fn shutdown_all(&mut self) {
        while let Some((id, mut slot)) = self.directory.pop() {
            let mut outbox = Vec::new();
            let env = self.pool.env();
            let mut ctx = Context::new(id, &mut outbox, env);
            slot.service.on_exit(&mut ctx);
            if let Some(name) = &slot.unique_name {
                self.pool.clear_unique(name);
            }
            self.pool.note_service_destroyed(self.index);
        }
    }
}
