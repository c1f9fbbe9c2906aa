//! Service registry, worker selection, and the two read-mostly maps (unique
//! service names, process environment) shared across every worker.
//!
//! Grounded on `netcore/core/service_pool.cpp`: a `type_name → constructor`
//! registry populated at startup, a worker-selection policy that skips
//! workers flagged exclusive, and reader-writer-locked maps for the rarely
//! written, frequently read unique-name and env tables.

use crate::id::ServiceId;
use crate::message::Message;
use crate::service::Service;
use crate::service_worker::{CreateReply, WorkerCommand};
use hashbrown::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::RwLock;
use weave::logging::{self, Logger};

pub type ServiceCtor = std::sync::Arc<dyn Fn() -> Box<dyn Service> + Send + Sync>;

/// The process-wide `name -> value` table exposed via `get_env`/`set_env`.
/// Read-mostly: writes only happen around service creation/configuration.
pub struct EnvTable {
    inner: RwLock<HashMap<String, String>>,
}

impl EnvTable {
    fn new() -> EnvTable {
        EnvTable { inner: RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.read().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.write().unwrap().insert(key.into(), value.into());
    }
}

/// State shared by every [`crate::service_worker::ServiceWorker`] and the
/// [`Runtime`](crate::runtime::Runtime) facade: the type registry, the
/// unique-name table, the env table, and a channel to every worker's command
/// queue.
pub struct PoolShared {
    registry: RwLock<HashMap<String, ServiceCtor>>,
    unique_services: RwLock<HashMap<String, ServiceId>>,
    env: EnvTable,
    worker_txs: Vec<Sender<WorkerCommand>>,
    exclusive: Vec<AtomicBool>,
    service_counts: Vec<AtomicUsize>,
    next_rr: AtomicUsize,
    log: Logger,
}

impl PoolShared {
    pub fn new(worker_txs: Vec<Sender<WorkerCommand>>, log: Logger) -> PoolShared {
        let exclusive = worker_txs.iter().map(|_| AtomicBool::new(false)).collect();
        let service_counts = worker_txs.iter().map(|_| AtomicUsize::new(0)).collect();
        PoolShared {
            registry: RwLock::new(HashMap::new()),
            unique_services: RwLock::new(HashMap::new()),
            env: EnvTable::new(),
            worker_txs,
            exclusive,
            service_counts,
            next_rr: AtomicUsize::new(0),
            log,
        }
    }

    /// Called by a [`crate::service_worker::ServiceWorker`] right after it
    /// inserts a newly created service into its directory.
    pub fn note_service_created(&self, worker: u8) {
        if let Some(count) = self.service_counts.get(worker as usize) {
            count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Called by a [`crate::service_worker::ServiceWorker`] right after it
    /// removes a torn-down service from its directory.
    pub fn note_service_destroyed(&self, worker: u8) {
        if let Some(count) = self.service_counts.get(worker as usize) {
            count.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Sum of every worker's live service count, per [`Runtime::servicenum`](crate::runtime::Runtime::servicenum).
    pub fn total_service_count(&self) -> usize {
        self.service_counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Signals every worker to stop accepting new commands and tear down -
    /// the first step of the deterministic shutdown order.
    pub fn shutdown_all_workers(&self) {
        for tx in &self.worker_txs {
            let _ = tx.send(WorkerCommand::Shutdown);
        }
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.worker_txs.len()
    }

    #[inline]
    pub fn env(&self) -> &EnvTable {
        &self.env
    }

    pub fn register_type(&self, name: impl Into<String>, ctor: ServiceCtor) {
        self.registry.write().unwrap().insert(name.into(), ctor);
    }

    fn lookup_ctor(&self, name: &str) -> Option<ServiceCtor> {
        self.registry.read().unwrap().get(name).cloned()
    }

    /// Atomically claims `name` for `id`. Returns `false` (no mutation) if
    /// another service already holds it.
    pub fn try_register_unique(&self, name: &str, id: ServiceId) -> bool {
        let mut map = self.unique_services.write().unwrap();
        if map.contains_key(name) {
            return false;
        }
        map.insert(name.to_string(), id);
        true
    }

    pub fn clear_unique(&self, name: &str) {
        self.unique_services.write().unwrap().remove(name);
    }

    pub fn get_unique_service(&self, name: &str) -> Option<ServiceId> {
        self.unique_services.read().unwrap().get(name).copied()
    }

    /// Marks worker `index` exclusive (or not): excluded from `next_worker`'s
    /// round robin unless every worker is exclusive.
    pub fn set_exclusive(&self, index: u8, exclusive: bool) {
        if let Some(flag) = self.exclusive.get(index as usize) {
            flag.store(exclusive, Ordering::Relaxed);
        }
    }

    /// Picks the next worker to host a new service, skipping exclusive
    /// workers unless all of them are exclusive, in which case the pool falls
    /// back to the least-loaded worker (by live service count) rather than
    /// unrestricted round robin.
    pub fn next_worker(&self) -> u8 {
        let all_exclusive = self.exclusive.iter().all(|flag| flag.load(Ordering::Relaxed));
        let count = self.worker_txs.len() as u64;

        if all_exclusive {
            return self
                .service_counts
                .iter()
                .enumerate()
                .min_by_key(|(_, count)| count.load(Ordering::Relaxed))
                .map(|(index, _)| index as u8)
                .unwrap_or(0);
        }

        loop {
            let candidate = (self.next_rr.fetch_add(1, Ordering::Relaxed) as u64 % count) as u8;
            if !self.exclusive[candidate as usize].load(Ordering::Relaxed) {
                return candidate;
            }
        }
    }

    /// Sends a same-process cross-worker message to its receiver's owning worker.
    pub fn route_to(&self, msg: Message) {
        let worker = msg.receiver().worker_index() as usize;
        if let Some(tx) = self.worker_txs.get(worker) {
            let _ = tx.send(WorkerCommand::Inject(msg));
        } else {
            logging::warn!(self.log, "message addressed to unknown worker"; "worker" => worker);
        }
    }

    /// Fans `msg` out to every worker's command queue, each of which delivers
    /// it to every service it owns except the sender.
    pub fn broadcast(&self, msg: Message) {
        for tx in &self.worker_txs {
            let _ = tx.send(WorkerCommand::Inject(msg.clone()));
        }
    }

    /// Resolves `type_name`, reserves a worker (honoring `worker_hint` and the
    /// `exclusive` flag), and posts a create command. Blocks the calling
    /// thread on the worker's reply - this is the one synchronous operation in
    /// the facade, matching callers needing the new id back immediately.
    pub fn new_service(
        &self,
        type_name: &str,
        unique_name: Option<String>,
        config: String,
        worker_hint: Option<u8>,
    ) -> Result<ServiceId, crate::error::Error> {
        let ctor = self
            .lookup_ctor(type_name)
            .ok_or_else(|| crate::error::Error::UnknownServiceType(type_name.to_string()))?;

        if let Some(name) = &unique_name {
            if self.get_unique_service(name).is_some() {
                return Err(crate::error::Error::DuplicateUniqueService(name.clone()));
            }
        }

        let worker = worker_hint.unwrap_or_else(|| self.next_worker());
        let tx = self
            .worker_txs
            .get(worker as usize)
            .ok_or_else(|| crate::error::Error::InvalidState("worker_hint out of range"))?;

        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        let _ = tx.send(WorkerCommand::Create {
            ctor,
            unique_name,
            config,
            reply: reply_tx,
        });

        match reply_rx.recv() {
            Ok(CreateReply::Created(id)) => Ok(id),
            Ok(CreateReply::Failed(reason)) => Err(crate::error::Error::ServiceInitFailed(reason)),
            Err(_) => Err(crate::error::Error::InvalidState("worker shut down before replying")),
        }
    }
}
