//! Executes one request and streams the response body into a sink.
//!
//! # Design
//! `Executor` owns a configured `ureq::Agent`, so callers that keep one
//! around share its connection pool. The free function `execute` keeps the
//! one-shot contract: it builds a fresh transport for every call and folds
//! the outcome into an `ExecutionResult` triple.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use ureq::config::IpFamily;
use ureq::http::{self, Method, StatusCode};
use ureq::tls::TlsConfig;
use ureq::unversioned::transport::DefaultConnector;
use ureq::{Agent, AsSendBody, Body, Proxy};

use crate::config::TransportConfig;
use crate::error::ExecuteError;
use crate::request::{resolve_url, PreparedRequest, RequestSpec};
use crate::trace::{
    self, LogTracer, NoopTracer, Tracer, TracingConnector, TracingMiddleware, TracingResolver,
};

/// A completed transfer: the whole body reached the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub bytes_written: u64,
    pub status: u16,
}

/// Outcome of one execution as a `(bytes, status, error)` triple.
///
/// `status` is 0 when no response arrived; `bytes_written` is the count of
/// body bytes the sink accepted, partial when copying failed.
#[derive(Debug)]
pub struct ExecutionResult {
    pub bytes_written: u64,
    pub status: u16,
    pub error: Option<ExecuteError>,
}

impl ExecutionResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<Result<Transfer, ExecuteError>> for ExecutionResult {
    fn from(result: Result<Transfer, ExecuteError>) -> Self {
        match result {
            Ok(t) => ExecutionResult {
                bytes_written: t.bytes_written,
                status: t.status,
                error: None,
            },
            Err(e) => ExecutionResult {
                bytes_written: e.bytes_written(),
                status: e.status(),
                error: Some(e),
            },
        }
    }
}

/// Reusable request executor bound to one transport configuration.
#[derive(Debug, Clone)]
pub struct Executor {
    agent: Agent,
    config: TransportConfig,
}

impl Executor {
    pub fn new(config: TransportConfig) -> Self {
        let agent = build_agent(&config);
        Self { agent, config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Execute `spec`, tracing to the log when `spec.debug` is set.
    pub fn execute(
        &self,
        spec: &RequestSpec,
        sink: Option<&mut dyn Write>,
    ) -> Result<Transfer, ExecuteError> {
        let tracer: Arc<dyn Tracer> = if spec.debug {
            Arc::new(LogTracer::new())
        } else {
            Arc::new(NoopTracer)
        };
        self.execute_traced(spec, sink, tracer)
    }

    /// Execute `spec` with an explicit lifecycle observer.
    ///
    /// Validation happens before any network activity, in order: sink,
    /// timeout, URL, method. Only status 200 counts as success; any other
    /// status is returned as `BadStatus` without reading the body.
    pub fn execute_traced(
        &self,
        spec: &RequestSpec,
        sink: Option<&mut dyn Write>,
        tracer: Arc<dyn Tracer>,
    ) -> Result<Transfer, ExecuteError> {
        tracing::info!(url = %spec.url, method = %spec.method, "executing request");

        let sink = sink.ok_or_else(|| ExecuteError::invalid("nil writer"))?;
        let prepared = spec.prepare()?;

        if prepared.is_https() && self.config.insecure_skip_verify {
            tracing::warn!(uri = %prepared.uri, "certificate verification disabled for this request");
        }

        let response = trace::scoped(tracer, || self.send(prepared)).map_err(|e| {
            tracing::warn!(error = %e, "client do error");
            ExecuteError::Connection(e)
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(status = status.as_u16(), "bad response");
            return Err(ExecuteError::BadStatus {
                status: status.as_u16(),
            });
        }

        let mut reader = response.into_body().into_reader();
        let mut counter = CountingWriter::new(sink);
        match io::copy(&mut reader, &mut counter) {
            Ok(n) => Ok(Transfer {
                bytes_written: n,
                status: status.as_u16(),
            }),
            Err(source) => Err(ExecuteError::Copy {
                written: counter.written,
                source,
            }),
        }
    }

    fn send(&self, prepared: PreparedRequest) -> Result<http::Response<Body>, ureq::Error> {
        let timeout = prepared.timeout;
        let (request, body) = prepared.into_request();
        // A sized body, even an empty one, goes out with Content-Length.
        if !body.is_empty() || expects_body(request.method()) {
            self.run(request.map(|()| body), timeout)
        } else {
            self.run(request, timeout)
        }
    }

    fn run<B: AsSendBody>(
        &self,
        request: http::Request<B>,
        timeout: Duration,
    ) -> Result<http::Response<Body>, ureq::Error> {
        let request = self
            .agent
            .configure_request(request)
            .timeout_global(Some(timeout))
            .build();
        self.agent.run(request)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

fn build_agent(config: &TransportConfig) -> Agent {
    let ip_family = if config.dual_stack {
        IpFamily::Any
    } else {
        IpFamily::Ipv4Only
    };
    let proxy = if config.proxy_from_env {
        Proxy::try_from_env()
    } else {
        None
    };

    let mut builder = Agent::config_builder()
        .http_status_as_error(false)
        .allow_non_standard_methods(true)
        .proxy(proxy)
        .max_idle_connections(config.max_idle_connections)
        .max_idle_connections_per_host(config.max_idle_connections_per_host)
        .max_idle_age(config.idle_timeout)
        .timeout_connect(Some(config.dial_timeout))
        .timeout_await_100(Some(config.expect_continue_timeout))
        .ip_family(ip_family)
        .middleware(TracingMiddleware);

    if config.insecure_skip_verify {
        tracing::warn!("transport built with certificate verification disabled");
        builder = builder.tls_config(TlsConfig::builder().disable_verification(true).build());
    }

    Agent::with_parts(
        builder.build(),
        TracingConnector::new(DefaultConnector::new()),
        TracingResolver::default(),
    )
}

fn expects_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// Transport config for a one-shot call: certificate verification is off
/// for https targets. Unparseable URLs get the default; `prepare` reports them.
fn one_shot_config(spec: &RequestSpec) -> TransportConfig {
    let https = resolve_url(&spec.url)
        .map(|uri| uri.scheme_str() == Some("https"))
        .unwrap_or(false);
    TransportConfig::default().insecure(https)
}

/// Execute one request over a freshly built transport.
///
/// An empty `host` means no override. Certificates are not verified for
/// https URLs. The transport is dropped when the call returns, so no
/// connection outlives it.
#[allow(clippy::too_many_arguments)]
pub fn execute(
    url: &str,
    method: &str,
    body: &str,
    host: &str,
    timeout: Duration,
    sink: Option<&mut dyn Write>,
    debug: bool,
    extra_headers: &HashMap<String, String>,
) -> ExecutionResult {
    let spec = RequestSpec {
        url: url.to_string(),
        method: method.to_string(),
        body: body.to_string(),
        host: (!host.is_empty()).then(|| host.to_string()),
        timeout,
        headers: extra_headers.clone(),
        debug,
    };
    Executor::new(one_shot_config(&spec)).execute(&spec, sink).into()
}

/// Write adapter that counts the bytes the inner sink accepted.
struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    written: u64,
}

impl<'a> CountingWriter<'a> {
    fn new(inner: &'a mut dyn Write) -> Self {
        Self { inner, written: 0 }
    }
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
