#![allow(clippy::new_without_default)]

//! A multithreaded actor runtime: a fixed pool of service workers, each
//! cooperatively dispatching a set of single-threaded services, backed by an
//! independent I/O worker pool for TCP networking and a per-worker
//! hierarchical timer wheel.
//!
//! [`runtime::Runtime`] is the entry point. Everything else - [`service`]'s
//! `Service` trait, [`message::Message`], [`buffer::Buffer`], [`network::Network`]
//! - is reachable through it or passed to it at startup.

pub mod buffer;
pub mod error;
pub mod id;
pub mod io_pool;
pub mod io_worker;
pub mod message;
pub mod network;
pub mod queue;
pub mod runtime;
pub mod service;
pub mod service_pool;
pub mod service_worker;
pub mod session;
pub mod timer;

pub use buffer::Buffer;
pub use error::{Error, Result};
pub use id::{ServiceId, SessionId};
pub use message::{Message, MessageType, NetworkErrorCategory};
pub use runtime::{Runtime, RuntimeConfig};
pub use service::{Context, Service};
