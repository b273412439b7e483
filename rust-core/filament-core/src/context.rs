//! # Request Context
//!
//! Per-request state threaded through the router, middleware and handler:
//! the request, the response under construction, bound path parameters, the
//! parsed query string, a key/value store, a unique id, a cancellation token
//! and, after an upgrade, a socket handle.
//!
//! Contexts are pooled by the server and fully reset between requests.

use crate::codec::{self, Codec, MediaType};
use crate::error::{Error, Result};
use crate::json;
use crate::request::Request;
use crate::response::Response;
use crate::server::ServerConfig;
use crate::socket::{Notifier, Socket, Upgrade};
use crate::state::Store;
use crate::types::Params;
use hyper::body::Bytes;
use hyper::upgrade::OnUpgrade;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Centralized error handler
///
/// Receives every error that escapes a handler chain. It should only write a
/// response when [`Response::is_done`] is false.
pub type ErrorHandler = Arc<dyn Fn(&Error, &mut Context) + Send + Sync>;

/// Default error handler: log, then write the status and public message as text
pub fn default_error_handler(err: &Error, ctx: &mut Context) {
    let status = err.status();
    if status >= 500 {
        error!(id = %ctx.uniq(), path = %ctx.request().path(), error = %err, "Request failed");
    } else {
        debug!(id = %ctx.uniq(), path = %ctx.request().path(), error = %err, "Request rejected");
    }
    if !ctx.response().is_done() {
        let _ = ctx.text(status, err.public_message());
    }
}

/// Server-wide values every context can reach
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    pub(crate) on_error: ErrorHandler,
    pub(crate) shutdown: CancellationToken,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            config: ServerConfig::default(),
            on_error: Arc::new(default_error_handler),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Per-request context
pub struct Context {
    uniq: String,
    request: Request,
    response: Response,
    params: Params,
    query: Params,
    pattern: Option<String>,
    store: Store,
    socket: Option<Socket>,
    token: CancellationToken,
    on_upgrade: Option<OnUpgrade>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("uniq", &self.uniq)
            .field("method", &self.request.method())
            .field("path", &self.request.path())
            .field("params", &self.params)
            .field("store", &self.store)
            .field("socket", &self.socket.is_some())
            .finish_non_exhaustive()
    }
}

impl Context {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            uniq: new_uniq(),
            request: Request::default(),
            response: Response::new(),
            params: Params::new(),
            query: Params::new(),
            pattern: None,
            store: Store::new(),
            socket: None,
            token: shared.shutdown.child_token(),
            on_upgrade: None,
            shared,
        }
    }

    /// Create a standalone context around a request (for testing/internal use)
    #[must_use]
    pub fn from_request(request: Request) -> Self {
        let mut ctx = Self::new(Arc::new(Shared::default()));
        ctx.reset(request, None);
        ctx
    }

    /// Prepare a pooled context for a new request
    pub(crate) fn reset(&mut self, request: Request, on_upgrade: Option<OnUpgrade>) {
        self.clear();
        self.query = Params::parse(request.query_string().unwrap_or_default().as_bytes());
        self.request = request;
        self.on_upgrade = on_upgrade;
    }

    /// Drop all request-scoped state
    pub(crate) fn clear(&mut self) {
        self.uniq = new_uniq();
        self.request = Request::default();
        self.response.reset();
        self.params.clear();
        self.query.clear();
        self.pattern = None;
        self.store.clear();
        self.socket = None;
        self.token = self.shared.shutdown.child_token();
        self.on_upgrade = None;
    }

    /// Owned copy of the request-scoped state, for work that outlives the
    /// HTTP exchange (socket connections)
    ///
    /// The copy shares id, parameters, store values and socket handle, gets
    /// an empty response and body, and a token that is cancelled on server
    /// shutdown.
    #[must_use]
    pub fn detach(&self) -> Self {
        let mut request = self.request.clone();
        request.clear_body();
        Self {
            uniq: self.uniq.clone(),
            request,
            response: Response::new(),
            params: self.params.clone(),
            query: self.query.clone(),
            pattern: self.pattern.clone(),
            store: self.store.clone(),
            socket: self.socket.clone(),
            token: self.shared.shutdown.child_token(),
            on_upgrade: None,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Unique id of this request
    #[must_use]
    pub fn uniq(&self) -> &str {
        &self.uniq
    }

    /// The request
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// The request, mutably
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// The response under construction
    #[must_use]
    pub const fn response(&self) -> &Response {
        &self.response
    }

    /// The response under construction, mutably
    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Take the response, leaving an empty one behind
    pub(crate) fn take_response(&mut self) -> Response {
        std::mem::take(&mut self.response)
    }

    /// Server configuration
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Cancellation token of this request
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Swap the cancellation token, returning the previous one
    pub fn replace_token(&mut self, token: CancellationToken) -> CancellationToken {
        std::mem::replace(&mut self.token, token)
    }

    /// First value of a path parameter
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// All path parameters
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Bind path parameters
    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    /// Pattern of the route that matched, if any
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub(crate) fn set_pattern(&mut self, pattern: Option<String>) {
        self.pattern = pattern;
    }

    /// First value of a query parameter
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name)
    }

    /// All query parameters
    #[must_use]
    pub const fn queries(&self) -> &Params {
        &self.query
    }

    /// First value of a URL-encoded form field
    #[must_use]
    pub fn form(&self, name: &str) -> Option<String> {
        if self.media() != Some(MediaType::Form) {
            return None;
        }
        Params::parse(self.request.body()).get(name).map(str::to_string)
    }

    /// Request body
    #[must_use]
    pub fn body(&self) -> &Bytes {
        self.request.body()
    }

    /// Media type of the request body: `Content-Type` without parameters, lower-cased
    #[must_use]
    pub fn kind(&self) -> String {
        self.request
            .header("content-type")
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Recognized media type of the request body
    #[must_use]
    pub fn media(&self) -> Option<MediaType> {
        MediaType::parse(&self.kind())
    }

    /// Client IP: `X-Real-IP`, then the first `X-Forwarded-For` hop, then the peer
    #[must_use]
    pub fn ip(&self) -> String {
        if let Some(ip) = self.request.header("x-real-ip") {
            return ip.trim().to_string();
        }
        if let Some(first) = self
            .request
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
        {
            return first.trim().to_string();
        }
        self.request
            .remote()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default()
    }

    /// Borrow a stored value
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.store.get(key)
    }

    /// Store a value; the last write for a key wins
    pub fn set<T: Send + Sync + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.store.set(key, value);
    }

    /// The request store
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Socket handle, after a successful upgrade
    #[must_use]
    pub const fn socket(&self) -> Option<&Socket> {
        self.socket.as_ref()
    }

    /// Whether this request is (or is becoming) a WebSocket
    #[must_use]
    pub fn is_socket(&self) -> bool {
        self.socket.is_some() || self.request.is_websocket()
    }

    /// Report an error through the centralized error handler
    pub fn error(&mut self, err: &Error) {
        let handler = Arc::clone(&self.shared.on_error);
        handler(err, self);
    }

    /// Decode the body according to its media type
    ///
    /// Unrecognized or textual media types fall back to the configured
    /// default media type.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` (reported as `400`) if the body does not fit `T`
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self.request.body();
        match self.media().unwrap_or(self.config().default_media) {
            MediaType::Xml => codec::from_xml(body),
            MediaType::MsgPack => codec::from_msgpack(body),
            MediaType::Cbor => codec::from_cbor(body),
            MediaType::Form => codec::from_form(body),
            MediaType::Json | MediaType::Text | MediaType::Html => json::parse_json(body),
        }
    }

    /// Finish with a status and no body
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for symmetry with the other writers
    pub fn code(&mut self, status: u16) -> Result<()> {
        self.response.finish(status);
        Ok(())
    }

    /// Write raw bytes with an explicit content type
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for symmetry with the other writers
    pub fn data(&mut self, status: u16, content_type: &str, body: impl Into<Bytes>) -> Result<()> {
        self.response.write(status, Some(content_type), body);
        Ok(())
    }

    /// Write a plain text body
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for symmetry with the other writers
    pub fn text(&mut self, status: u16, body: impl Into<String>) -> Result<()> {
        self.data(status, MediaType::Text.content_type(), body.into())
    }

    /// Write an HTML body
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for symmetry with the other writers
    pub fn html(&mut self, status: u16, body: impl Into<String>) -> Result<()> {
        self.data(status, MediaType::Html.content_type(), body.into())
    }

    /// Write a JSON body
    ///
    /// # Errors
    ///
    /// Returns `Error::Encode` if the value cannot be serialized
    pub fn json<T: Serialize + ?Sized>(&mut self, status: u16, value: &T) -> Result<()> {
        let body = json::to_json(value)?;
        self.data(status, MediaType::Json.content_type(), body)
    }

    /// Write an XML body with a `response` root element
    ///
    /// # Errors
    ///
    /// Returns `Error::Encode` if the value cannot be serialized
    pub fn xml<T: Serialize>(&mut self, status: u16, value: &T) -> Result<()> {
        let body = codec::to_xml(value, "response")?;
        self.data(status, MediaType::Xml.content_type(), body)
    }

    /// Write a MessagePack body
    ///
    /// # Errors
    ///
    /// Returns `Error::Encode` if the value cannot be serialized
    pub fn pack<T: Serialize + ?Sized>(&mut self, status: u16, value: &T) -> Result<()> {
        let body = codec::to_msgpack(value)?;
        self.data(status, MediaType::MsgPack.content_type(), body)
    }

    /// Write a CBOR body
    ///
    /// # Errors
    ///
    /// Returns `Error::Encode` if the value cannot be serialized
    pub fn cbor<T: Serialize + ?Sized>(&mut self, status: u16, value: &T) -> Result<()> {
        let body = codec::to_cbor(value)?;
        self.data(status, MediaType::Cbor.content_type(), body)
    }

    /// Write a body in the request's media type, or the configured default
    ///
    /// # Errors
    ///
    /// Returns `Error::Encode` if the value cannot be serialized
    pub fn send<T: Serialize>(&mut self, status: u16, value: &T) -> Result<()> {
        let negotiated = self
            .media()
            .filter(|m| matches!(m, MediaType::Json | MediaType::Xml | MediaType::MsgPack | MediaType::Cbor))
            .unwrap_or(self.config().default_media);
        match negotiated {
            MediaType::Xml => self.xml(status, value),
            MediaType::MsgPack => self.pack(status, value),
            MediaType::Cbor => self.cbor(status, value),
            _ => self.json(status, value),
        }
    }

    /// Accept a WebSocket upgrade speaking one of `codecs`
    ///
    /// The client's sub-protocol preference wins among the accepted codecs.
    /// A client that requests no sub-protocol gets the first codec. On
    /// success the `101` response is written and a socket handle attached.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` if the client did not ask for an upgrade,
    /// sent no key, requested only unsupported sub-protocols, or the
    /// connection cannot be upgraded.
    pub fn upgrade(&mut self, codecs: &[Codec]) -> Result<Upgrade> {
        if !self.request.is_websocket() {
            return Err(Error::Protocol(
                "client did not request a websocket upgrade".to_string(),
            ));
        }
        let key = self
            .request
            .header("sec-websocket-key")
            .map(str::to_string)
            .ok_or_else(|| Error::Protocol("missing Sec-WebSocket-Key".to_string()))?;

        let requested: Vec<String> = self
            .request
            .header("sec-websocket-protocol")
            .map(|v| {
                v.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let (codec, echo) = if requested.is_empty() {
            let codec = codecs
                .first()
                .copied()
                .ok_or_else(|| Error::Protocol("no codec is accepted".to_string()))?;
            (codec, false)
        } else {
            let codec = requested
                .iter()
                .filter_map(|p| Codec::from_protocol(p))
                .find(|c| codecs.contains(c))
                .ok_or_else(|| {
                    Error::Protocol(format!(
                        "none of the requested sub-protocols is supported: {}",
                        requested.join(", ")
                    ))
                })?;
            (codec, true)
        };

        let on_upgrade = self
            .on_upgrade
            .take()
            .ok_or_else(|| Error::Protocol("connection cannot be upgraded".to_string()))?;

        self.response.set_header("Upgrade", "websocket");
        self.response.set_header("Connection", "Upgrade");
        self.response
            .set_header("Sec-WebSocket-Accept", &derive_accept_key(key.as_bytes()));
        if echo {
            self.response
                .set_header("Sec-WebSocket-Protocol", codec.protocol());
        }
        self.response.finish(101);

        let (notifier, notifications) = Notifier::channel(self.config().notification_buffer);
        self.socket = Some(Socket::new(codec, notifier));
        Ok(Upgrade::new(codec, on_upgrade, notifications))
    }

    #[cfg(test)]
    pub(crate) fn set_on_upgrade(&mut self, on_upgrade: OnUpgrade) {
        self.on_upgrade = Some(on_upgrade);
    }
}

fn new_uniq() -> String {
    uuid::Uuid::new_v4().to_string()
}
