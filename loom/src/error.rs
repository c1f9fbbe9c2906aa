//! Crate-wide error type for operations that can fail in ways a caller needs
//! to branch on (config loading aside, which panics the way [`weave::config`]
//! does). Plain enum with manual `From` impls, matching `flux::shared::NetworkError`
//! rather than pulling in an error-derive crate for a handful of variants.

use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// A `new_service` call named a unique-service name that is already registered.
    DuplicateUniqueService(String),
    /// `new_service`/`register_service` referenced a type name with no registered constructor.
    UnknownServiceType(String),
    /// The target of a `send`/`make_response` call is not in the worker's directory, or is
    /// already tearing down.
    UnknownService(u32),
    /// A session id used in `send`/`close` is not tracked by any I/O worker.
    UnknownSession(u32),
    /// `listen`/`sync_connect` failed at the OS socket layer.
    Io(io::Error),
    /// An incoming frame declared a length over the configured maximum.
    FrameTooLarge { declared: usize, max: usize },
    /// The runtime was asked to do something that only makes sense before/after `run()`.
    InvalidState(&'static str),
    /// `new_service` reached the target worker but creation failed there (`init`
    /// returned `false`, or the unique name lost a race after the pre-check).
    ServiceInitFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DuplicateUniqueService(name) => {
                write!(f, "unique service `{}` is already registered", name)
            }
            Error::UnknownServiceType(name) => write!(f, "no service type registered as `{}`", name),
            Error::UnknownService(id) => write!(f, "no such service: {}", id),
            Error::UnknownSession(id) => write!(f, "no such session: {}", id),
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::FrameTooLarge { declared, max } => {
                write!(f, "frame size {} exceeds maximum {}", declared, max)
            }
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Error::ServiceInitFailed(reason) => write!(f, "service creation failed: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}
