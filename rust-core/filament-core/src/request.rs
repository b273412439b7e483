//! # HTTP Request
//!
//! Owned request head plus the collected body.
//!
//! ## Design Principles (SOLID)
//!
//! - **S**: Request only handles request data, not response
//! - **O**: Extensible via new methods without breaking changes
//! - **D**: Handlers see framework types, hyper stays behind the server

use crate::error::{Error, Result};
use crate::router::Method;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Uri, Version};
use std::net::SocketAddr;
use std::time::Instant;

/// HTTP request
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    remote: Option<SocketAddr>,
    start: Instant,
}

impl Default for Request {
    fn default() -> Self {
        Self::new(Method::Get, "/")
    }
}

impl Request {
    /// Create a request manually (for testing/internal use)
    ///
    /// An unparsable target falls back to `/`.
    #[must_use]
    pub fn new(method: Method, target: &str) -> Self {
        Self {
            method,
            uri: target.parse().unwrap_or_else(|_| Uri::from_static("/")),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote: None,
            start: Instant::now(),
        }
    }

    /// Set a header, builder style
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set the body, builder style
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the peer address, builder style
    #[must_use]
    pub const fn with_remote(mut self, remote: SocketAddr) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Create from hyper request with body size limit
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLarge` if the declared or actual body size
    /// exceeds `max_body_size`, `Error::MethodNotAllowed` for extension
    /// methods and `Error::Hyper` if the body stream fails.
    pub async fn from_hyper_with_limit(
        req: hyper::Request<hyper::body::Incoming>,
        max_body_size: usize,
        remote: Option<SocketAddr>,
    ) -> Result<Self> {
        let (parts, body) = req.into_parts();
        let method = Method::from_hyper(&parts.method).ok_or_else(|| Error::MethodNotAllowed {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
        })?;

        if let Some(declared) = content_length(&parts.headers) {
            if declared > max_body_size {
                return Err(Error::PayloadTooLarge {
                    limit: max_body_size,
                    actual: declared,
                });
            }
        }

        let body = BodyExt::collect(body).await?.to_bytes();
        if body.len() > max_body_size {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: body.len(),
            });
        }

        Ok(Self {
            method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            remote,
            start: Instant::now(),
        })
    }

    /// HTTP method
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Full request URI
    #[must_use]
    pub const fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Request path (without query string)
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Protocol version
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// All request headers
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// Collected request body
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as UTF-8 text
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Peer address of the connection
    #[must_use]
    pub const fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// When the request head was received
    #[must_use]
    pub const fn start(&self) -> Instant {
        self.start
    }

    /// Declared body length
    #[must_use]
    pub fn content_length(&self) -> Option<usize> {
        content_length(&self.headers)
    }

    /// Host name without port, from the URI authority or the `Host` header
    #[must_use]
    pub fn host(&self) -> &str {
        let host = self
            .uri
            .host()
            .or_else(|| self.header("host"))
            .unwrap_or_default();
        strip_port(host)
    }

    /// URI scheme, honoring `X-Forwarded-Proto` behind proxies
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.uri
            .scheme_str()
            .or_else(|| self.header("x-forwarded-proto"))
            .unwrap_or("http")
    }

    /// `User-Agent` header
    #[must_use]
    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or_default()
    }

    /// Whether the client asked for a WebSocket upgrade
    #[must_use]
    pub fn is_websocket(&self) -> bool {
        let upgrade = self
            .header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        let connection = self.header("connection").is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
        upgrade && connection
    }

    /// Drop the body, keeping the head
    pub fn clear_body(&mut self) {
        self.body = Bytes::new();
    }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split_once(']').map_or(host, |(h, _)| &h[1..]);
    }
    host.rsplit_once(':').map_or(host, |(h, _)| h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_and_query() {
        let req = Request::new(Method::Get, "/search?q=rust&page=2");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=rust&page=2"));
    }

    #[test]
    fn test_headers_case_insensitive() {
        let req = Request::new(Method::Post, "/").with_header("Content-Type", "text/plain");
        assert_eq!(req.header("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_host_strips_port() {
        let req = Request::new(Method::Get, "/").with_header("Host", "example.com:8080");
        assert_eq!(req.host(), "example.com");

        let req = Request::new(Method::Get, "/").with_header("Host", "[::1]:8080");
        assert_eq!(req.host(), "::1");
    }

    #[test]
    fn test_scheme_default_and_forwarded() {
        let req = Request::new(Method::Get, "/");
        assert_eq!(req.scheme(), "http");
        let req = req.with_header("X-Forwarded-Proto", "https");
        assert_eq!(req.scheme(), "https");
    }

    #[test]
    fn test_websocket_detection() {
        let req = Request::new(Method::Get, "/ws")
            .with_header("Upgrade", "WebSocket")
            .with_header("Connection", "keep-alive, Upgrade");
        assert!(req.is_websocket());
        assert!(!Request::new(Method::Get, "/ws").is_websocket());
    }

    #[test]
    fn test_content_length() {
        let req = Request::new(Method::Post, "/")
            .with_header("Content-Length", "12")
            .with_body("hello");
        assert_eq!(req.content_length(), Some(12));
        assert_eq!(req.body_str(), Some("hello"));
    }
}
