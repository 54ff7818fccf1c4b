//! Single-shot diagnostic HTTP request executor.
//!
//! # Overview
//! Sends one request with a configurable method, body, host override,
//! timeout and extra headers, then streams the response body into a
//! caller-supplied sink and reports `(bytes_written, status, error)`.
//!
//! # Design
//! - `RequestSpec::prepare` is the "build request" half: validation, URL
//!   defaulting and method normalization, no I/O.
//! - `Executor` is the "execute and copy" half and owns the transport.
//!   Reuse one to share connections; the free `execute` builds a fresh one
//!   per call.
//! - Lifecycle tracing goes through the `Tracer` observer, no-op unless
//!   requested.
//! - Only status 200 is success. Other statuses are errors that still carry
//!   the status code; their bodies are not relayed.

pub mod config;
pub mod error;
pub mod executor;
pub mod request;
pub mod trace;

pub use config::TransportConfig;
pub use error::{ErrorKind, ExecuteError};
pub use executor::{execute, ExecutionResult, Executor, Transfer};
pub use request::{PreparedRequest, RequestSpec};
pub use trace::{LogTracer, NoopTracer, Tracer};
