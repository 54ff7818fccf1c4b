//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! The request is borrowed from the C caller for the duration of one call;
//! the result is heap-allocated here and released by `probe_free_result`.
//! The sink is a C write callback plus an opaque context pointer.

use std::ffi::{c_void, CStr, CString};
use std::io::{self, Write};
use std::os::raw::c_char;
use std::time::Duration;

use probe_core::{ErrorKind, ExecutionResult, RequestSpec};

/// Opaque handle to a reusable `Executor`. C callers receive a pointer to
/// this and pass it back into `probe_executor_execute`.
pub struct FfiExecutor {
    pub(crate) inner: probe_core::Executor,
}

// ---------------------------------------------------------------------------
// Request input (caller-provided, borrowed for one call)
// ---------------------------------------------------------------------------

/// A single extra header. Entries with a null key are skipped; a null value
/// is sent as an empty string.
#[repr(C)]
pub struct FfiHeader {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// A request described as C-compatible plain data.
///
/// `url` is required. Null `method` and `body` are treated as empty
/// strings; a null or empty `host` means no host override.
#[repr(C)]
pub struct FfiRequest {
    pub url: *const c_char,
    pub method: *const c_char,
    pub body: *const c_char,
    pub host: *const c_char,
    pub timeout_ms: u64,
    pub debug: bool,
    pub headers: *const FfiHeader,
    pub headers_len: u32,
}

impl FfiRequest {
    /// Copy the C request into a core `RequestSpec`.
    ///
    /// Returns the name of the offending field when a required pointer is
    /// null.
    ///
    /// # Safety
    /// Every non-null string must be NUL-terminated, and `headers` must
    /// point to `headers_len` valid entries.
    pub(crate) unsafe fn to_spec(&self) -> Result<RequestSpec, &'static str> {
        if self.url.is_null() {
            return Err("url");
        }
        if self.headers.is_null() && self.headers_len > 0 {
            return Err("headers");
        }

        let mut spec = RequestSpec {
            url: unsafe { owned(self.url) },
            method: unsafe { owned(self.method) },
            body: unsafe { owned(self.body) },
            host: None,
            timeout: Duration::from_millis(self.timeout_ms),
            debug: self.debug,
            ..RequestSpec::default()
        };

        let host = unsafe { owned(self.host) };
        if !host.is_empty() {
            spec.host = Some(host);
        }

        if self.headers_len > 0 {
            let headers =
                unsafe { std::slice::from_raw_parts(self.headers, self.headers_len as usize) };
            for h in headers.iter().filter(|h| !h.key.is_null()) {
                spec.headers
                    .insert(unsafe { owned(h.key) }, unsafe { owned(h.value) });
            }
        }

        Ok(spec)
    }
}

/// Copy a nullable C string. Null becomes the empty string; invalid UTF-8
/// is replaced.
unsafe fn owned(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Body sink callback. Receives `len` bytes at `data` and returns how many it
/// accepted. Returning 0 for a non-empty buffer fails the copy.
pub type FfiSinkFn = extern "C" fn(ctx: *mut c_void, data: *const u8, len: usize) -> usize;

/// Adapts a C sink callback to `io::Write`.
pub(crate) struct CallbackSink {
    pub(crate) write: FfiSinkFn,
    pub(crate) ctx: *mut c_void,
}

impl Write for CallbackSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = (self.write)(self.ctx, buf.as_ptr(), buf.len());
        if n > buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sink reported {n} bytes for a {} byte buffer", buf.len()),
            ));
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Error codes returned in `FfiExecutionResult`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    InvalidArgument = 1,
    Parse = 2,
    Connection = 3,
    BadStatus = 4,
    Copy = 5,
    Config = 6,
    Panic = 7,
    NullArg = 8,
}

impl From<ErrorKind> for FfiErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::InvalidArgument => FfiErrorCode::InvalidArgument,
            ErrorKind::Parse => FfiErrorCode::Parse,
            ErrorKind::Connection => FfiErrorCode::Connection,
            ErrorKind::BadStatus => FfiErrorCode::BadStatus,
            ErrorKind::Copy => FfiErrorCode::Copy,
            ErrorKind::Config => FfiErrorCode::Config,
        }
    }
}

/// Outcome of one execution.
///
/// On success `error_code` is `Ok` and `error_message` is null. On failure
/// `error_message` is a human-readable C string. `http_status` and
/// `bytes_written` are filled in either way.
#[repr(C)]
pub struct FfiExecutionResult {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub http_status: u16,
    pub bytes_written: u64,
}

impl FfiExecutionResult {
    pub(crate) fn from_core(result: ExecutionResult) -> *mut Self {
        let (error_code, error_message) = match &result.error {
            None => (FfiErrorCode::Ok, std::ptr::null_mut()),
            Some(e) => (e.kind().into(), c_string(&e.to_string())),
        };
        Box::into_raw(Box::new(FfiExecutionResult {
            error_code,
            error_message,
            http_status: result.status,
            bytes_written: result.bytes_written,
        }))
    }

    /// Build an error result for a null argument.
    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::failure(FfiErrorCode::NullArg, &format!("null argument: {name}"))
    }

    /// Build an error result for a caught panic.
    pub(crate) fn panic(msg: &str) -> *mut Self {
        Self::failure(FfiErrorCode::Panic, msg)
    }

    fn failure(error_code: FfiErrorCode, msg: &str) -> *mut Self {
        Box::into_raw(Box::new(FfiExecutionResult {
            error_code,
            error_message: c_string(msg),
            http_status: 0,
            bytes_written: 0,
        }))
    }
}

fn c_string(s: &str) -> *mut c_char {
    CString::new(s.replace('\0', " "))
        .unwrap_or_default()
        .into_raw()
}
