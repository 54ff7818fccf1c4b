//! Lifecycle tracing for a single request.
//!
//! # Design
//! A `Tracer` is an observer with no-op defaults. The transport calls it
//! from three hook points: a resolver wrapper (DNS), a connector wrapper
//! (dial start/done, new connection handed out) and an agent middleware
//! (pooled connection reused, request written, first response byte).
//! Because one agent may serve many calls, the tracer for the current call
//! is installed in a thread-local for the duration of the blocking
//! round-trip; all hooks run on the calling thread.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use ureq::config::Config;
use ureq::http::{self, Uri};
use ureq::middleware::{Middleware, MiddlewareNext};
use ureq::unversioned::resolver::{DefaultResolver, ResolvedSocketAddrs, Resolver};
use ureq::unversioned::transport::{ConnectionDetails, Connector, NextTimeout};
use ureq::{Body, SendBody};

/// Observer for request lifecycle milestones. Events never influence the
/// outcome of an execution.
pub trait Tracer: Send + Sync {
    fn dns_start(&self, _host: &str) {}
    fn dns_done(&self, _result: Result<&[SocketAddr], &ureq::Error>) {}
    /// A new connection is being dialed to one of `addrs`.
    fn connect_start(&self, _addrs: &[SocketAddr]) {}
    fn connect_done(&self, _result: Result<(), &ureq::Error>) {}
    /// A connection was handed to the request, freshly dialed or from the pool.
    fn got_conn(&self, _reused: bool) {}
    /// The request went out on an acquired connection. An error here means
    /// the exchange broke after the connection was acquired.
    fn wrote_request(&self, _result: Result<(), &ureq::Error>) {}
    fn first_response_byte(&self, _status: u16) {}
}

/// Tracer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

/// Tracer that writes each event to the `probe::trace` log target with the
/// time elapsed since it was created.
#[derive(Debug)]
pub struct LogTracer {
    started: Instant,
}

impl LogTracer {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LogTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracer for LogTracer {
    fn dns_start(&self, host: &str) {
        tracing::info!(target: "probe::trace", elapsed_ms = self.elapsed_ms(), host, "dns start");
    }

    fn dns_done(&self, result: Result<&[SocketAddr], &ureq::Error>) {
        match result {
            Ok(addrs) => tracing::info!(
                target: "probe::trace",
                elapsed_ms = self.elapsed_ms(),
                addrs = ?addrs,
                "dns done"
            ),
            Err(e) => tracing::info!(
                target: "probe::trace",
                elapsed_ms = self.elapsed_ms(),
                error = %e,
                "dns done with error"
            ),
        }
    }

    fn connect_start(&self, addrs: &[SocketAddr]) {
        tracing::info!(target: "probe::trace", elapsed_ms = self.elapsed_ms(), addrs = ?addrs, "conn start");
    }

    fn connect_done(&self, result: Result<(), &ureq::Error>) {
        match result {
            Ok(()) => tracing::info!(target: "probe::trace", elapsed_ms = self.elapsed_ms(), "conn done"),
            Err(e) => tracing::info!(
                target: "probe::trace",
                elapsed_ms = self.elapsed_ms(),
                error = %e,
                "unable to connect to host"
            ),
        }
    }

    fn got_conn(&self, reused: bool) {
        tracing::info!(target: "probe::trace", elapsed_ms = self.elapsed_ms(), reused, "got conn");
    }

    fn wrote_request(&self, result: Result<(), &ureq::Error>) {
        match result {
            Ok(()) => tracing::info!(target: "probe::trace", elapsed_ms = self.elapsed_ms(), "wrote request ok"),
            Err(e) => tracing::info!(
                target: "probe::trace",
                elapsed_ms = self.elapsed_ms(),
                error = %e,
                "wrote request err"
            ),
        }
    }

    fn first_response_byte(&self, status: u16) {
        tracing::info!(target: "probe::trace", elapsed_ms = self.elapsed_ms(), status, "got response");
    }
}

/// Per-call tracing state: the tracer plus what the hooks have seen so far.
struct Scope {
    tracer: Arc<dyn Tracer>,
    dialed: Cell<bool>,
    failed_before_conn: Cell<bool>,
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<Scope>>> = const { RefCell::new(None) };
}

/// Run `f` with `tracer` receiving the events raised on this thread.
pub(crate) fn scoped<R>(tracer: Arc<dyn Tracer>, f: impl FnOnce() -> R) -> R {
    let scope = Rc::new(Scope {
        tracer,
        dialed: Cell::new(false),
        failed_before_conn: Cell::new(false),
    });
    let previous = CURRENT.with(|c| c.replace(Some(scope)));
    let _restore = Restore(previous);
    f()
}

struct Restore(Option<Rc<Scope>>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT.with(|c| *c.borrow_mut() = previous);
    }
}

fn with_scope(f: impl FnOnce(&Scope)) {
    // Clone out so a tracer may itself start a traced call.
    let scope = CURRENT.with(|c| c.borrow().clone());
    if let Some(scope) = scope {
        f(&scope);
    }
}

fn emit(f: impl FnOnce(&dyn Tracer)) {
    with_scope(|s| f(s.tracer.as_ref()));
}

/// Resolver that reports lookups to the current tracer.
#[derive(Default)]
pub(crate) struct TracingResolver {
    inner: DefaultResolver,
}

impl fmt::Debug for TracingResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingResolver").finish_non_exhaustive()
    }
}

impl Resolver for TracingResolver {
    fn resolve(
        &self,
        uri: &Uri,
        config: &Config,
        timeout: NextTimeout,
    ) -> Result<ResolvedSocketAddrs, ureq::Error> {
        let host = uri.host().unwrap_or_default();
        emit(|t| t.dns_start(host));

        let result = self.inner.resolve(uri, config, timeout);
        with_scope(|s| match &result {
            Ok(addrs) => s.tracer.dns_done(Ok(&addrs[..])),
            Err(e) => {
                s.failed_before_conn.set(true);
                s.tracer.dns_done(Err(e));
            }
        });
        result
    }
}

/// Connector that reports dials to the current tracer. Only runs when the
/// pool has no idle connection for the target.
pub(crate) struct TracingConnector<C> {
    inner: C,
}

impl<C> TracingConnector<C> {
    pub(crate) fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C> fmt::Debug for TracingConnector<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingConnector").finish_non_exhaustive()
    }
}

impl<C: Connector> Connector for TracingConnector<C> {
    type Out = C::Out;

    fn connect(
        &self,
        details: &ConnectionDetails,
        chained: Option<()>,
    ) -> Result<Option<Self::Out>, ureq::Error> {
        emit(|t| t.connect_start(&details.addrs[..]));

        let result = self.inner.connect(details, chained);
        with_scope(|s| match &result {
            Ok(Some(_)) => {
                s.dialed.set(true);
                s.tracer.connect_done(Ok(()));
                s.tracer.got_conn(false);
            }
            Ok(None) => {}
            Err(e) => {
                s.failed_before_conn.set(true);
                s.tracer.connect_done(Err(e));
            }
        });
        result
    }
}

/// Middleware that reports the outcome of the exchange to the current tracer.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn handle(
        &self,
        request: http::Request<SendBody>,
        next: MiddlewareNext,
    ) -> Result<http::Response<Body>, ureq::Error> {
        let result = next.handle(request);
        with_scope(|s| {
            let t = s.tracer.as_ref();
            match &result {
                Ok(response) => {
                    if !s.dialed.get() {
                        t.got_conn(true);
                    }
                    t.wrote_request(Ok(()));
                    t.first_response_byte(response.status().as_u16());
                }
                // DNS and dial failures were already reported by their hooks.
                Err(_) if s.failed_before_conn.get() => {}
                Err(e) => t.wrote_request(Err(e)),
            }
        });
        result
    }
}
