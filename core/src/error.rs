//! Error types for the request executor.
//!
//! # Design
//! Each variant maps to one failure stage of a single execution: argument
//! validation, URL parsing, the network exchange, the status check and the
//! body copy. `BadStatus` and `Copy` carry the status code and partial byte
//! count so callers still see how far the request got.

use std::io;

use thiserror::Error;

/// Errors returned by `Executor::execute` and the one-shot `execute`.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// A required argument was missing or malformed (sink, timeout, method,
    /// header).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The target URL could not be parsed.
    #[error("could not parse url {url:?}: {reason}")]
    Parse { url: String, reason: String },

    /// DNS, connect, TLS, send or timeout failure before a response arrived.
    #[error("request failed: {0}")]
    Connection(#[source] ureq::Error),

    /// The server answered with anything other than 200. The body is not
    /// relayed.
    #[error("bad response: status {status}")]
    BadStatus { status: u16 },

    /// Copying the response body into the sink failed after `written` bytes.
    #[error("copy failed after {written} bytes: {source}")]
    Copy {
        written: u64,
        #[source]
        source: io::Error,
    },

    /// A transport configuration could not be loaded.
    #[error("invalid transport config: {0}")]
    Config(String),
}

/// Coarse category of an `ExecuteError`, stable across the FFI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Parse,
    Connection,
    BadStatus,
    Copy,
    Config,
}

impl ExecuteError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ExecuteError::InvalidArgument(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecuteError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ExecuteError::Parse { .. } => ErrorKind::Parse,
            ExecuteError::Connection(_) => ErrorKind::Connection,
            ExecuteError::BadStatus { .. } => ErrorKind::BadStatus,
            ExecuteError::Copy { .. } => ErrorKind::Copy,
            ExecuteError::Config(_) => ErrorKind::Config,
        }
    }

    /// Status code the caller should see alongside this error: the server's
    /// status for `BadStatus`, 200 for `Copy`, 0 when no response arrived.
    pub fn status(&self) -> u16 {
        match self {
            ExecuteError::BadStatus { status } => *status,
            ExecuteError::Copy { .. } => 200,
            _ => 0,
        }
    }

    /// Body bytes delivered to the sink before the failure.
    pub fn bytes_written(&self) -> u64 {
        match self {
            ExecuteError::Copy { written, .. } => *written,
            _ => 0,
        }
    }
}
