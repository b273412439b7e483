//! # HTTP Response
//!
//! Response state accumulated while a handler chain runs. The first body
//! write marks the response as done; later writes are ignored so that a
//! handler and an error handler can never both produce a body.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, StatusCode};

/// HTTP response under construction
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
    done: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            done: false,
        }
    }
}

impl Response {
    /// Create an empty `200` response
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP status code
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Set the status code without finishing the response
    pub fn set_status(&mut self, status: u16) {
        if !self.done {
            self.status = status;
        }
    }

    /// Response headers
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
    pub fn set_header(&mut self, key: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// Response body
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body length in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Whether a body (or a terminal status) has been written
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Write status, content type and body, finishing the response
    ///
    /// Returns `false` (and changes nothing) if the response was already done.
    pub fn write(&mut self, status: u16, content_type: Option<&str>, body: impl Into<Bytes>) -> bool {
        if self.done {
            return false;
        }
        self.status = status;
        if let Some(kind) = content_type {
            self.set_header(CONTENT_TYPE.as_str(), kind);
        }
        self.body = body.into();
        self.done = true;
        true
    }

    /// Finish the response with a status and no body
    pub fn finish(&mut self, status: u16) -> bool {
        self.write(status, None, Bytes::new())
    }

    /// Rewrite the body of a finished response (used by body-transforming middleware)
    pub fn map_body(&mut self, f: impl FnOnce(Bytes) -> Bytes) {
        let body = std::mem::take(&mut self.body);
        self.body = f(body);
    }

    /// Reset to an empty `200` response, keeping the header allocation
    pub fn reset(&mut self) {
        self.status = 200;
        self.headers.clear();
        self.body = Bytes::new();
        self.done = false;
    }

    /// Convert to hyper Response
    #[must_use]
    pub fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let mut res = hyper::Response::new(Full::new(self.body));
        *res.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        *res.headers_mut() = self.headers;
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_write_wins() {
        let mut res = Response::new();
        assert!(res.write(201, Some("text/plain"), "created"));
        assert!(!res.write(500, Some("text/plain"), "oops"));
        assert_eq!(res.status(), 201);
        assert_eq!(res.body(), b"created");
        assert!(res.is_done());
    }

    #[test]
    fn test_set_status_after_done_is_ignored() {
        let mut res = Response::new();
        res.finish(204);
        res.set_status(500);
        assert_eq!(res.status(), 204);
    }

    #[test]
    fn test_map_body() {
        let mut res = Response::new();
        res.write(200, None, "abc");
        res.map_body(|b| Bytes::from(b.to_ascii_uppercase()));
        assert_eq!(res.body(), b"ABC");
    }

    #[test]
    fn test_reset() {
        let mut res = Response::new();
        res.set_header("X-Test", "1");
        res.write(404, None, "missing");
        res.reset();
        assert_eq!(res.status(), 200);
        assert!(res.headers().is_empty());
        assert!(!res.is_done());
    }

    #[test]
    fn test_into_hyper() {
        let mut res = Response::new();
        res.set_header("X-Request-Id", "abc");
        res.write(999, None, "");
        let hyper_res = res.into_hyper();
        assert_eq!(hyper_res.status(), StatusCode::from_u16(999).unwrap());
        assert_eq!(hyper_res.headers()["x-request-id"], "abc");
    }
}
