//! Request description and the "build request" half of an execution.
//!
//! # Design
//! `RequestSpec` is plain caller-owned data. `prepare` validates it and
//! resolves it into a `PreparedRequest` without touching the network, so
//! method normalization, URL defaulting and header handling can be checked
//! in isolation from the transport.

use std::collections::HashMap;
use std::time::Duration;

use ureq::http::{self, header, uri::Scheme, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use url::Url;

use crate::error::ExecuteError;

/// Timeout used by `RequestSpec::new`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One outgoing request, consumed by a single execution.
#[derive(Debug, Clone, Default)]
pub struct RequestSpec {
    /// Target URL. A missing scheme means `http`.
    pub url: String,
    /// `get`/`post` in any case become `GET`/`POST`; anything else is sent as given.
    pub method: String,
    pub body: String,
    /// Replaces the `Host` header when set and non-empty. Routing still
    /// follows `url`.
    pub host: Option<String>,
    /// Bounds the whole exchange, body included. Must be non-zero.
    pub timeout: Duration,
    /// Appended to the client's default headers.
    pub headers: HashMap<String, String>,
    /// Emit lifecycle tracing for this request.
    pub debug: bool,
}

impl RequestSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            timeout: DEFAULT_TIMEOUT,
            ..Self::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Validate the spec and resolve it into a sendable request.
    ///
    /// Checks run in a fixed order (timeout, URL, method, headers) and the
    /// first failure is returned.
    pub fn prepare(&self) -> Result<PreparedRequest, ExecuteError> {
        if self.timeout.is_zero() {
            return Err(ExecuteError::invalid("timeout can not be 0"));
        }

        let uri = resolve_url(&self.url)?;
        let method = normalize_method(&self.method)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ExecuteError::invalid(format!("header name {name:?}: {e}")))?;
            // The authority comes from the URL or the host override only.
            if name == header::HOST {
                tracing::debug!("ignoring Host in extra headers");
                continue;
            }
            let value = HeaderValue::from_str(value)
                .map_err(|e| ExecuteError::invalid(format!("header value for {name}: {e}")))?;
            headers.append(name, value);
        }

        if let Some(host) = self.host.as_deref().filter(|h| !h.is_empty()) {
            let value = HeaderValue::from_str(host)
                .map_err(|e| ExecuteError::invalid(format!("host {host:?}: {e}")))?;
            headers.insert(header::HOST, value);
        }

        Ok(PreparedRequest {
            method,
            uri,
            headers,
            body: self.body.as_bytes().to_vec(),
            timeout: self.timeout,
        })
    }
}

/// A validated request, ready to hand to the transport.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub uri: Uri,
    /// Caller headers only; the client adds its defaults when sending.
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

impl PreparedRequest {
    pub fn is_https(&self) -> bool {
        self.uri.scheme() == Some(&Scheme::HTTPS)
    }

    /// The authority the server will see: the host override if one was
    /// set, otherwise the URL's own authority.
    pub fn authority(&self) -> Option<&str> {
        self.headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
    }

    /// Split into a bodiless `http::Request` and the raw body bytes.
    pub(crate) fn into_request(self) -> (http::Request<()>, Vec<u8>) {
        let mut request = http::Request::new(());
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.headers_mut() = self.headers;
        (request, self.body)
    }
}

/// Canonicalize `GET`/`POST` regardless of case; pass other methods through.
pub fn normalize_method(raw: &str) -> Result<Method, ExecuteError> {
    if raw.is_empty() {
        return Err(ExecuteError::invalid("no http method"));
    }
    if raw.eq_ignore_ascii_case("GET") {
        return Ok(Method::GET);
    }
    if raw.eq_ignore_ascii_case("POST") {
        return Ok(Method::POST);
    }
    Method::from_bytes(raw.as_bytes())
        .map_err(|e| ExecuteError::invalid(format!("http method {raw:?}: {e}")))
}

/// Parse `raw` as a URL, defaulting the scheme to `http`.
pub fn resolve_url(raw: &str) -> Result<Uri, ExecuteError> {
    let parse_err = |reason: String| ExecuteError::Parse {
        url: raw.to_string(),
        reason,
    };

    let url = if has_scheme(raw) {
        Url::parse(raw)
    } else {
        Url::parse(&format!("http://{raw}"))
    }
    .map_err(|e| parse_err(e.to_string()))?;

    url.as_str()
        .parse::<Uri>()
        .map_err(|e| parse_err(e.to_string()))
}

fn has_scheme(raw: &str) -> bool {
    let Some(end) = raw.find("://") else {
        return false;
    };
    let mut chars = raw[..end].chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn get_and_post_normalize_in_any_case() {
        for raw in ["get", "Get", "GET", "gEt"] {
            assert_eq!(normalize_method(raw).unwrap(), Method::GET, "{raw}");
        }
        for raw in ["post", "Post", "POST"] {
            assert_eq!(normalize_method(raw).unwrap(), Method::POST, "{raw}");
        }
    }

    #[test]
    fn other_methods_pass_through_unchanged() {
        assert_eq!(normalize_method("PATCH").unwrap(), Method::PATCH);
        assert_eq!(normalize_method("patch").unwrap().as_str(), "patch");
        assert_eq!(normalize_method("PURGE").unwrap().as_str(), "PURGE");
    }

    #[test]
    fn empty_method_is_rejected() {
        let err = normalize_method("").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn method_with_whitespace_is_rejected() {
        let err = normalize_method("GE T").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn scheme_less_url_defaults_to_http() {
        let uri = resolve_url("example.com/path").unwrap();
        assert_eq!(uri.to_string(), "http://example.com/path");
    }

    #[test]
    fn explicit_scheme_is_kept() {
        let uri = resolve_url("https://example.com/a?b=c").unwrap();
        assert_eq!(uri.scheme_str(), Some("https"));
        assert_eq!(uri.path_and_query().unwrap().as_str(), "/a?b=c");
    }

    #[test]
    fn scheme_in_query_does_not_count() {
        let uri = resolve_url("example.com/go?to=http://other").unwrap();
        assert_eq!(uri.host(), Some("example.com"));
        assert_eq!(uri.scheme_str(), Some("http"));
    }

    #[test]
    fn malformed_url_is_parse_error() {
        let err = resolve_url("http://%zz").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.status(), 0);
    }

    #[test]
    fn empty_url_is_parse_error() {
        let err = resolve_url("").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn zero_timeout_is_rejected_before_url() {
        let spec = RequestSpec::new("http://%zz").timeout(Duration::ZERO);
        let err = spec.prepare().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn bad_url_is_reported_before_empty_method() {
        let spec = RequestSpec::new("http://%zz").method("");
        let err = spec.prepare().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn host_override_replaces_authority() {
        let prepared = RequestSpec::new("http://127.0.0.1:8080/x")
            .host("virtual.test")
            .prepare()
            .unwrap();
        assert_eq!(prepared.authority(), Some("virtual.test"));
        assert_eq!(prepared.uri.host(), Some("127.0.0.1"));
    }

    #[test]
    fn empty_host_override_is_ignored() {
        let prepared = RequestSpec::new("http://127.0.0.1:8080/x")
            .host("")
            .prepare()
            .unwrap();
        assert!(prepared.headers.get(header::HOST).is_none());
        assert_eq!(prepared.authority(), Some("127.0.0.1:8080"));
    }

    #[test]
    fn extra_headers_are_carried() {
        let prepared = RequestSpec::new("example.com")
            .header("X-Probe", "1")
            .header("accept-language", "en")
            .prepare()
            .unwrap();
        assert_eq!(prepared.headers.get("x-probe").unwrap(), "1");
        assert_eq!(prepared.headers.get("accept-language").unwrap(), "en");
    }

    #[test]
    fn host_in_extra_headers_does_not_change_authority() {
        let prepared = RequestSpec::new("http://example.com:8080/x")
            .header("Host", "evil.example")
            .header("X-Trace", "1")
            .prepare()
            .unwrap();
        assert!(prepared.headers.get(header::HOST).is_none());
        assert_eq!(prepared.authority(), Some("example.com:8080"));
        assert_eq!(prepared.headers["x-trace"], "1");
    }

    #[test]
    fn host_override_wins_over_host_in_extra_headers() {
        let prepared = RequestSpec::new("http://example.com/")
            .header("host", "evil.example")
            .host("virtual.example")
            .prepare()
            .unwrap();
        assert_eq!(prepared.authority(), Some("virtual.example"));
        assert_eq!(prepared.headers.get_all(header::HOST).iter().count(), 1);
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let err = RequestSpec::new("example.com")
            .header("bad header", "1")
            .prepare()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn into_request_keeps_method_uri_and_headers() {
        let prepared = RequestSpec::new("example.com/path")
            .method("put")
            .body("payload")
            .header("x-probe", "1")
            .prepare()
            .unwrap();
        let (request, body) = prepared.into_request();
        assert_eq!(request.method().as_str(), "put");
        assert_eq!(request.uri().to_string(), "http://example.com/path");
        assert_eq!(request.headers().get("x-probe").unwrap(), "1");
        assert_eq!(body, b"payload");
    }

    #[test]
    fn https_is_detected() {
        let prepared = RequestSpec::new("https://example.com").prepare().unwrap();
        assert!(prepared.is_https());
        let prepared = RequestSpec::new("example.com").prepare().unwrap();
        assert!(!prepared.is_https());
    }
}
