//! C-ABI wrapper around `probe-core`.
//!
//! # Overview
//! Exposes one-shot and reusable request execution through `extern "C"`
//! functions. The response body is streamed into a C callback; a null
//! callback is the "absent sink" and fails with `InvalidArgument` like any
//! other validation error.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - `probe_execute` builds a fresh transport per call; an `FfiExecutor`
//!   keeps one alive so connections are reused.
//! - The C caller owns all returned pointers and must call the matching
//!   `probe_free_*` / `probe_executor_free` function to release them.

pub mod types;

use std::ffi::{c_void, CStr, CString};
use std::io::Write;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use probe_core::{ExecutionResult, Executor, TransportConfig};

use types::*;

// ---------------------------------------------------------------------------
// Executor lifecycle
// ---------------------------------------------------------------------------

/// Create a reusable executor.
///
/// `config_json` may be null for the default transport, or a JSON object
/// overriding any `TransportConfig` field. Returns null if the config is
/// invalid or an internal panic occurs. Free with `probe_executor_free`.
#[unsafe(no_mangle)]
pub extern "C" fn probe_executor_new(config_json: *const c_char) -> *mut FfiExecutor {
    catch_unwind(|| {
        let config = if config_json.is_null() {
            TransportConfig::default()
        } else {
            let json = unsafe { CStr::from_ptr(config_json) }.to_string_lossy();
            match TransportConfig::from_json(&json) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "rejected executor config");
                    return std::ptr::null_mut();
                }
            }
        };
        let executor = Executor::new(config);
        Box::into_raw(Box::new(FfiExecutor { inner: executor }))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free an executor created by `probe_executor_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn probe_executor_free(executor: *mut FfiExecutor) {
    if !executor.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(executor) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Execute one request over a freshly built transport.
///
/// `sink` may be null, in which case the result carries `InvalidArgument`.
/// The caller must free the returned pointer with `probe_free_result`.
#[unsafe(no_mangle)]
pub extern "C" fn probe_execute(
    request: *const FfiRequest,
    sink: Option<FfiSinkFn>,
    sink_ctx: *mut c_void,
) -> *mut FfiExecutionResult {
    catch_unwind(AssertUnwindSafe(|| {
        execute_with(&Executor::default(), request, sink, sink_ctx)
    }))
    .unwrap_or_else(|_| FfiExecutionResult::panic("panic in probe_execute"))
}

/// Execute one request on a reusable executor.
#[unsafe(no_mangle)]
pub extern "C" fn probe_executor_execute(
    executor: *const FfiExecutor,
    request: *const FfiRequest,
    sink: Option<FfiSinkFn>,
    sink_ctx: *mut c_void,
) -> *mut FfiExecutionResult {
    catch_unwind(AssertUnwindSafe(|| {
        if executor.is_null() {
            return FfiExecutionResult::null_arg("executor");
        }
        let executor = unsafe { &*executor };
        execute_with(&executor.inner, request, sink, sink_ctx)
    }))
    .unwrap_or_else(|_| FfiExecutionResult::panic("panic in probe_executor_execute"))
}

fn execute_with(
    executor: &Executor,
    request: *const FfiRequest,
    sink: Option<FfiSinkFn>,
    sink_ctx: *mut c_void,
) -> *mut FfiExecutionResult {
    if request.is_null() {
        return FfiExecutionResult::null_arg("request");
    }
    let spec = match unsafe { (*request).to_spec() } {
        Ok(spec) => spec,
        Err(field) => return FfiExecutionResult::null_arg(field),
    };

    let mut callback = sink.map(|write| CallbackSink {
        write,
        ctx: sink_ctx,
    });
    let sink = callback.as_mut().map(|s| s as &mut dyn Write);
    let result: ExecutionResult = executor.execute(&spec, sink).into();
    FfiExecutionResult::from_core(result)
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free an `FfiExecutionResult`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn probe_free_result(result: *mut FfiExecutionResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let result = unsafe { Box::from_raw(result) };
        if !result.error_message.is_null() {
            drop(unsafe { CString::from_raw(result.error_message) });
        }
    });
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn probe_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    extern "C" fn collect(ctx: *mut c_void, data: *const u8, len: usize) -> usize {
        let buf = unsafe { &mut *(ctx as *mut Vec<u8>) };
        buf.extend_from_slice(unsafe { std::slice::from_raw_parts(data, len) });
        len
    }

    extern "C" fn refuse(_ctx: *mut c_void, _data: *const u8, _len: usize) -> usize {
        0
    }

    /// Owns the C strings an `FfiRequest` points into.
    struct OwnedRequest {
        url: CString,
        method: CString,
        host: Option<CString>,
        headers: Vec<(CString, CString)>,
        timeout_ms: u64,
    }

    impl OwnedRequest {
        fn new(url: &str) -> Self {
            Self {
                url: CString::new(url).unwrap(),
                method: CString::new("GET").unwrap(),
                host: None,
                headers: Vec::new(),
                timeout_ms: 5_000,
            }
        }

        fn run(&self, sink: Option<FfiSinkFn>, ctx: *mut c_void) -> *mut FfiExecutionResult {
            let headers: Vec<FfiHeader> = self
                .headers
                .iter()
                .map(|(k, v)| FfiHeader {
                    key: k.as_ptr(),
                    value: v.as_ptr(),
                })
                .collect();
            let request = FfiRequest {
                url: self.url.as_ptr(),
                method: self.method.as_ptr(),
                body: std::ptr::null(),
                host: self.host.as_ref().map_or(std::ptr::null(), |h| h.as_ptr()),
                timeout_ms: self.timeout_ms,
                debug: false,
                headers: if headers.is_empty() {
                    std::ptr::null()
                } else {
                    headers.as_ptr()
                },
                headers_len: headers.len() as u32,
            };
            probe_execute(&request, sink, ctx)
        }
    }

    fn server() -> SocketAddr {
        mock_server::spawn_background().unwrap()
    }

    fn message(r: &FfiExecutionResult) -> String {
        unsafe { CStr::from_ptr(r.error_message) }
            .to_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn null_request_is_null_arg() {
        let result = probe_execute(std::ptr::null(), Some(collect), std::ptr::null_mut());
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::NullArg);
        assert_eq!(message(r), "null argument: request");
        probe_free_result(result);
    }

    #[test]
    fn null_url_is_null_arg() {
        let request = FfiRequest {
            url: std::ptr::null(),
            method: std::ptr::null(),
            body: std::ptr::null(),
            host: std::ptr::null(),
            timeout_ms: 1_000,
            debug: false,
            headers: std::ptr::null(),
            headers_len: 0,
        };
        let result = probe_execute(&request, None, std::ptr::null_mut());
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::NullArg);
        assert_eq!(message(r), "null argument: url");
        probe_free_result(result);
    }

    #[test]
    fn null_sink_is_invalid_argument() {
        let req = OwnedRequest::new("http://127.0.0.1:9/");
        let result = req.run(None, std::ptr::null_mut());
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::InvalidArgument);
        assert_eq!((r.bytes_written, r.http_status), (0, 0));
        probe_free_result(result);
    }

    #[test]
    fn zero_timeout_is_invalid_argument() {
        let mut req = OwnedRequest::new("http://127.0.0.1:9/");
        req.timeout_ms = 0;
        let mut buf: Vec<u8> = Vec::new();
        let result = req.run(Some(collect), &mut buf as *mut Vec<u8> as *mut c_void);
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::InvalidArgument);
        probe_free_result(result);
    }

    #[test]
    fn malformed_url_is_parse_error() {
        let req = OwnedRequest::new("http://%zz");
        let mut buf: Vec<u8> = Vec::new();
        let result = req.run(Some(collect), &mut buf as *mut Vec<u8> as *mut c_void);
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::Parse);
        assert!(!r.error_message.is_null());
        probe_free_result(result);
    }

    #[test]
    fn hello_is_streamed_into_callback() {
        let addr = server();
        let req = OwnedRequest::new(&format!("http://{addr}/hello"));
        let mut buf: Vec<u8> = Vec::new();
        let result = req.run(Some(collect), &mut buf as *mut Vec<u8> as *mut c_void);
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::Ok);
        assert!(r.error_message.is_null());
        assert_eq!((r.bytes_written, r.http_status), (5, 200));
        assert_eq!(buf, b"hello");
        probe_free_result(result);
    }

    #[test]
    fn not_found_is_bad_status() {
        let addr = server();
        let req = OwnedRequest::new(&format!("http://{addr}/missing"));
        let mut buf: Vec<u8> = Vec::new();
        let result = req.run(Some(collect), &mut buf as *mut Vec<u8> as *mut c_void);
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::BadStatus);
        assert_eq!((r.bytes_written, r.http_status), (0, 404));
        assert!(buf.is_empty());
        probe_free_result(result);
    }

    #[test]
    fn refusing_sink_is_copy_error() {
        let addr = server();
        let req = OwnedRequest::new(&format!("http://{addr}/hello"));
        let result = req.run(Some(refuse), std::ptr::null_mut());
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::Copy);
        assert_eq!((r.bytes_written, r.http_status), (0, 200));
        probe_free_result(result);
    }

    #[test]
    fn headers_and_host_reach_server() {
        let addr = server();
        let mut req = OwnedRequest::new(&format!("http://{addr}/echo"));
        req.method = CString::new("patch").unwrap();
        req.host = Some(CString::new("virtual.test").unwrap());
        req.headers
            .push((CString::new("x-probe").unwrap(), CString::new("1").unwrap()));
        let mut buf: Vec<u8> = Vec::new();
        let result = req.run(Some(collect), &mut buf as *mut Vec<u8> as *mut c_void);
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::Ok);

        let echo: mock_server::Echo = serde_json::from_slice(&buf).unwrap();
        assert_eq!(echo.method, "patch");
        assert_eq!(echo.host.as_deref(), Some("virtual.test"));
        assert_eq!(echo.headers.get("x-probe").map(String::as_str), Some("1"));
        probe_free_result(result);
    }

    #[test]
    fn executor_new_rejects_bad_config() {
        let json = CString::new(r#"{"retries":3}"#).unwrap();
        let executor = probe_executor_new(json.as_ptr());
        assert!(executor.is_null());
    }

    #[test]
    fn executor_is_reusable() {
        let addr = server();
        let json = CString::new(r#"{"max_idle_connections":4}"#).unwrap();
        let executor = probe_executor_new(json.as_ptr());
        assert!(!executor.is_null());

        let url = CString::new(format!("http://{addr}/hello")).unwrap();
        let method = CString::new("get").unwrap();
        let request = FfiRequest {
            url: url.as_ptr(),
            method: method.as_ptr(),
            body: std::ptr::null(),
            host: std::ptr::null(),
            timeout_ms: 5_000,
            debug: true,
            headers: std::ptr::null(),
            headers_len: 0,
        };
        for _ in 0..2 {
            let mut buf: Vec<u8> = Vec::new();
            let result = probe_executor_execute(
                executor,
                &request,
                Some(collect),
                &mut buf as *mut Vec<u8> as *mut c_void,
            );
            let r = unsafe { &*result };
            assert_eq!(r.error_code, FfiErrorCode::Ok);
            assert_eq!(buf, b"hello");
            probe_free_result(result);
        }

        probe_executor_free(executor);
    }

    #[test]
    fn null_executor_is_null_arg() {
        let result = probe_executor_execute(
            std::ptr::null(),
            std::ptr::null(),
            None,
            std::ptr::null_mut(),
        );
        let r = unsafe { &*result };
        assert_eq!(r.error_code, FfiErrorCode::NullArg);
        assert_eq!(message(r), "null argument: executor");
        probe_free_result(result);
    }

    #[test]
    fn free_functions_accept_null() {
        probe_free_result(std::ptr::null_mut());
        probe_free_string(std::ptr::null_mut());
        probe_executor_free(std::ptr::null_mut());
    }
}
