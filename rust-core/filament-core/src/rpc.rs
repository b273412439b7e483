//! # JSON-RPC
//!
//! Named-method dispatch over HTTP (`POST`, one call per request) and over
//! WebSocket (`GET` + upgrade, many calls per connection).
//!
//! Methods are registered on a [`Service`] as typed async functions; their
//! argument tuple declares the arity and how untyped wire arguments are
//! coerced (see [`coerce`](crate::coerce)).
//!
//! ```ignore
//! let service = Service::new()
//!     .method("Echo", |_ctx: &Context, (msg,): (String,)| async move {
//!         Ok::<_, Infallible>(msg)
//!     });
//! router.rpc("/rpc", Arc::new(service));
//! ```
//!
//! A request without an id (absent, `null` or `""`) is a notification and
//! never produces a response, whatever the outcome.

use crate::codec::Codec;
use crate::coerce::{CoerceError, FromParams};
use crate::context::Context;
use crate::error::Result;
use crate::handler::{BoxFuture, Handler};
use crate::router::Method;
use crate::socket::{self, Heartbeat};
use futures_util::FutureExt;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Invalid JSON was received
pub const PARSE_ERROR: i32 = -32700;
/// The request is not a valid request object
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameters
pub const INVALID_PARAMS: i32 = -32602;
/// The method returned an error
pub const SERVER_ERROR: i32 = -32000;
/// The method failed in an unexpected way
pub const UNKNOWN_ERROR: i32 = -32099;

/// RPC request envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id; absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name
    #[serde(default)]
    pub method: String,
    /// Positional arguments
    #[serde(default, deserialize_with = "params_or_empty")]
    pub params: Vec<Value>,
}

fn params_or_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<Value>, D::Error> {
    Option::<Vec<Value>>::deserialize(d).map(Option::unwrap_or_default)
}

impl RpcRequest {
    /// Create a call expecting a response
    #[must_use]
    pub fn call(id: impl Into<Value>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Create a notification (no id, no response)
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }

    /// The id, unless this request is a notification
    #[must_use]
    pub fn reply_id(&self) -> Option<&Value> {
        self.id.as_ref().filter(|id| !is_empty_id(id))
    }

    /// Whether this request expects no response
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.reply_id().is_none()
    }
}

fn is_empty_id(id: &Value) -> bool {
    match id {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// RPC response envelope; exactly one of `result` and `error` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Id of the request being answered
    pub id: Value,
    /// Method result
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub result: Option<Value>,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

// A present `null` result is still a result.
fn present<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}

impl RpcResponse {
    /// Successful response
    #[must_use]
    pub const fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response
    #[must_use]
    pub const fn failure(id: Value, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// RPC error object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code
    pub code: i32,
    /// Human readable message
    pub message: String,
}

impl RpcError {
    /// Create an error with an arbitrary code
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `-32700 Parse error`
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    /// `-32600 Invalid Request`
    #[must_use]
    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request")
    }

    /// `-32601 Method not found`
    #[must_use]
    pub fn method_not_found() -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found")
    }

    /// `-32602 Invalid params`
    #[must_use]
    pub fn invalid_params() -> Self {
        Self::new(INVALID_PARAMS, "Invalid params")
    }

    /// `-32000` carrying the method's own error message
    #[must_use]
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(SERVER_ERROR, message)
    }

    /// `-32099`, used when a method panicked
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_ERROR, "Unknown error")
    }
}

/// Outcome of decoding an inbound payload
#[derive(Debug)]
pub enum Decoded {
    /// A well-formed request
    Request(RpcRequest),
    /// Readable by the codec but not a request; the id when one could be read
    Malformed {
        /// Recovered, non-empty id
        id: Option<Value>,
        /// Decoder message
        reason: String,
    },
    /// The codec could not read the payload at all
    Unreadable(crate::error::Error),
}

/// Decode a request, recovering the id from malformed envelopes
#[must_use]
pub fn decode_request(codec: Codec, bytes: &[u8]) -> Decoded {
    let value: Value = match codec.decode(bytes) {
        Ok(value) => value,
        Err(err) => return Decoded::Unreadable(err),
    };
    let id = value
        .get("id")
        .filter(|id| !is_empty_id(id))
        .cloned();
    match serde_json::from_value::<RpcRequest>(value) {
        Ok(request) => Decoded::Request(request),
        Err(err) => Decoded::Malformed {
            id,
            reason: err.to_string(),
        },
    }
}

type Outcome = BoxFuture<'static, std::result::Result<Value, String>>;

trait Procedure: Send + Sync {
    fn arity(&self) -> usize;
    fn prepare(&self, ctx: &Context, params: Vec<Value>) -> std::result::Result<Outcome, CoerceError>;
}

struct Thunk<F, A> {
    f: F,
    _args: PhantomData<fn(A)>,
}

impl<F, A, Fut, R, E> Procedure for Thunk<F, A>
where
    A: FromParams,
    F: Fn(&Context, A) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    R: Serialize,
    E: Display,
{
    fn arity(&self) -> usize {
        A::ARITY
    }

    fn prepare(&self, ctx: &Context, params: Vec<Value>) -> std::result::Result<Outcome, CoerceError> {
        let args = A::from_params(params)?;
        let fut = (self.f)(ctx, args);
        Ok(Box::pin(async move {
            match fut.await {
                Ok(value) => serde_json::to_value(value).map_err(|e| e.to_string()),
                Err(err) => Err(err.to_string()),
            }
        }))
    }
}

/// Registry of named RPC methods
#[derive(Clone, Default)]
pub struct Service {
    methods: HashMap<String, Arc<dyn Procedure>>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.methods.keys().collect();
        names.sort();
        f.debug_struct("Service").field("methods", &names).finish()
    }
}

impl Service {
    /// Create an empty service
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method under `name`, replacing any previous one
    ///
    /// The method receives the request context and its coerced argument
    /// tuple, and resolves to `Ok(result)` or `Err(message)`.
    #[must_use]
    pub fn method<A, F, Fut, R, E>(mut self, name: impl Into<String>, f: F) -> Self
    where
        A: FromParams + 'static,
        F: Fn(&Context, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize + 'static,
        E: Display + 'static,
    {
        let thunk = Thunk {
            f,
            _args: PhantomData,
        };
        self.methods.insert(name.into(), Arc::new(thunk));
        self
    }

    /// Whether a method is registered under `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Number of registered methods
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Check if no methods are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Dispatch one request
    ///
    /// Returns `None` for notifications, whatever the outcome.
    pub async fn call(&self, ctx: &Context, request: RpcRequest) -> Option<RpcResponse> {
        let id = request.reply_id().cloned();
        let reply = |error: RpcError| id.clone().map(|id| RpcResponse::failure(id, error));

        if request.method.is_empty() {
            return reply(RpcError::invalid_request());
        }
        let Some(procedure) = self.methods.get(&request.method) else {
            debug!(method = %request.method, "RPC method not found");
            return reply(RpcError::method_not_found());
        };
        if request.params.len() > procedure.arity() {
            return reply(RpcError::invalid_params());
        }

        let prepared =
            std::panic::catch_unwind(AssertUnwindSafe(|| procedure.prepare(ctx, request.params)));
        let outcome = match prepared {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                debug!(method = %request.method, error = %err, "RPC argument coercion failed");
                return reply(RpcError::invalid_params());
            }
            Err(payload) => {
                warn!(method = %request.method, panic = %crate::error::Error::panic(&*payload), "RPC method panicked");
                return reply(RpcError::unknown());
            }
        };

        match AssertUnwindSafe(outcome).catch_unwind().await {
            Ok(Ok(value)) => id.map(|id| RpcResponse::success(id, value)),
            Ok(Err(message)) => reply(RpcError::server(message)),
            Err(payload) => {
                warn!(method = %request.method, panic = %crate::error::Error::panic(&*payload), "RPC method panicked");
                reply(RpcError::unknown())
            }
        }
    }
}

/// Route handler serving a [`Service`]
///
/// `POST` decodes one request from the body (codec chosen by
/// `Content-Type`) and answers `200` with the response or `204` for
/// notifications. `GET` upgrades to a WebSocket and serves the connection
/// until it closes.
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    service: Arc<Service>,
    codecs: Vec<Codec>,
}

impl RpcEndpoint {
    /// Serve `service`, accepting every codec on sockets
    #[must_use]
    pub fn new(service: Arc<Service>) -> Self {
        Self {
            service,
            codecs: Codec::ALL.to_vec(),
        }
    }

    /// Restrict the sub-protocols accepted on sockets, in preference order
    #[must_use]
    pub fn with_codecs(mut self, codecs: &[Codec]) -> Self {
        self.codecs = codecs.to_vec();
        self
    }

    async fn answer(&self, ctx: &mut Context) -> Result<()> {
        let codec = ctx
            .media()
            .and_then(|m| m.codec())
            .or_else(|| ctx.config().default_media.codec())
            .unwrap_or_default();

        let reply = match decode_request(codec, ctx.request().body()) {
            Decoded::Request(request) => self.service.call(ctx, request).await,
            Decoded::Malformed { id, reason } => {
                debug!(codec = %codec, reason = %reason, "Malformed RPC request");
                id.map(|id| RpcResponse::failure(id, RpcError::parse_error()))
            }
            Decoded::Unreadable(err) => {
                debug!(codec = %codec, error = %err, "Unreadable RPC request");
                None
            }
        };

        match reply {
            Some(response) => {
                let body = codec.encode(&response)?;
                ctx.data(200, codec.media_type().content_type(), body)
            }
            None => ctx.code(204),
        }
    }

    fn open(&self, ctx: &mut Context) -> Result<()> {
        let upgrade = ctx.upgrade(&self.codecs)?;
        let session = ctx.detach();
        let service = Arc::clone(&self.service);
        let heartbeat = Heartbeat::from_config(ctx.config());

        tokio::spawn(async move {
            let id = session.uniq().to_string();
            let codec = upgrade.codec();
            match upgrade.into_parts().await {
                Ok((stream, notifications)) => {
                    info!(id = %id, codec = %codec, "RPC socket opened");
                    let result = socket::serve_rpc(
                        stream,
                        codec,
                        service,
                        session,
                        notifications,
                        heartbeat,
                    )
                    .await;
                    match result {
                        Ok(()) => info!(id = %id, "RPC socket closed"),
                        Err(err) => warn!(id = %id, error = %err, "RPC socket terminated"),
                    }
                }
                Err(err) => warn!(id = %id, error = %err, "WebSocket upgrade failed"),
            }
        });
        Ok(())
    }
}

impl Handler for RpcEndpoint {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if ctx.request().method() == Method::Get {
                self.open(ctx)
            } else {
                self.answer(ctx).await
            }
        })
    }
}
