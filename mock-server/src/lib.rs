//! Fixed-response HTTP server used to exercise the probe executor.
//!
//! Every endpoint answers deterministically so tests can assert exact byte
//! counts, status codes and the request as the server saw it.

use std::{collections::BTreeMap, net::SocketAddr, time::Duration};

use axum::{
    body::{Body, Bytes},
    extract::Path,
    http::{header, HeaderMap, Method, StatusCode},
    routing::{any, get},
    Json, Router,
};
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// Body served by `GET /hello`.
pub const HELLO_BODY: &str = "hello";

/// How long `/slow` waits before answering.
pub const SLOW_DELAY: Duration = Duration::from_secs(2);

/// First chunk of the `/stall` body, sent before the server stalls.
pub const STALL_PREFIX: &str = "partial-";

/// Rest of the `/stall` body, sent after `SLOW_DELAY`.
pub const STALL_REST: &str = "rest";

/// The request as observed by `/echo`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Echo {
    pub method: String,
    pub host: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

pub fn app() -> Router {
    Router::new()
        .route("/hello", get(hello))
        .route("/missing", any(missing))
        .route("/echo", any(echo))
        .route("/slow", any(slow))
        .route("/stall", get(stall))
        .route("/bytes/{n}", get(bytes))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Start the server on a random loopback port in a background thread.
///
/// The thread owns a current-thread runtime, so blocking callers can issue
/// requests against the returned address without an async context.
pub fn spawn_background() -> std::io::Result<SocketAddr> {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = std_listener.local_addr()?;
    std_listener.set_nonblocking(true)?;

    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(error = %e, "failed to build mock server runtime");
                return;
            }
        };
        let result = rt.block_on(async {
            let listener = TcpListener::from_std(std_listener)?;
            run(listener).await
        });
        if let Err(e) = result {
            tracing::error!(error = %e, "mock server stopped");
        }
    });

    Ok(addr)
}

async fn hello() -> &'static str {
    HELLO_BODY
}

async fn missing() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "no such resource")
}

async fn echo(method: Method, headers: HeaderMap, body: String) -> Json<Echo> {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        seen.entry(name.as_str().to_string())
            .and_modify(|v| {
                v.push_str(", ");
                v.push_str(&value);
            })
            .or_insert(value);
    }

    Json(Echo {
        method: method.as_str().to_string(),
        host,
        headers: seen,
        body,
    })
}

async fn slow() -> &'static str {
    tokio::time::sleep(SLOW_DELAY).await;
    "late"
}

/// 200 with a chunked body that stops mid-way for `SLOW_DELAY`.
async fn stall() -> Body {
    let chunks = stream::unfold(0u8, |step| async move {
        let chunk = match step {
            0 => STALL_PREFIX,
            1 => {
                tokio::time::sleep(SLOW_DELAY).await;
                STALL_REST
            }
            _ => return None,
        };
        Some((Ok::<_, std::io::Error>(Bytes::from_static(chunk.as_bytes())), step + 1))
    });
    Body::from_stream(chunks)
}

async fn bytes(Path(n): Path<usize>) -> Vec<u8> {
    vec![b'x'; n]
}
