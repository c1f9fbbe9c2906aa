#![allow(clippy::new_without_default)]

//! Ambient infrastructure shared by the `loom` runtime and the binaries built on top
//! of it: logging, wall-clock helpers and config file loading. None of this is
//! runtime-specific; it is the same kind of plumbing every service in the stack
//! pulls in.

pub mod config;
pub mod logging;
pub mod time;
