//! # Filament Core
//!
//! Core runtime library for the Filament framework.
//! Provides an HTTP server, rank-ordered routing, handler-wrapping
//! middleware and an RPC layer served over HTTP and WebSockets.
//!
//! ## Architecture
//!
//! A request is read by the server into a pooled [`Context`], matched by the
//! [`Router`], wrapped by the [`MiddlewareChain`] and handed to its handler.
//! The RPC endpoint is itself a handler: it dispatches `{id, method, params}`
//! requests to a [`Service`] by name, coercing loosely typed parameters into
//! the method's argument types.
//!
//! ## Modules
//!
//! - `server` - HTTP server built on Hyper, graceful shutdown
//! - `router` - Method tables with rank-based route precedence
//! - `route` - Route patterns, ranking and matching
//! - `handler` - Handler trait and fallbacks
//! - `middleware` - Handler-wrapping middleware and built-ins
//! - `guard` - Conditional middleware
//! - `context` - Per-request context, content negotiation, upgrades
//! - `request` / `response` - HTTP message wrappers
//! - `codec` - JSON, CBOR, MessagePack, XML and form encodings
//! - `json` - JSON parsing with simd-json
//! - `coerce` - Dynamic value to typed argument coercion
//! - `rpc` - RPC messages, method registry and HTTP/WebSocket endpoint
//! - `socket` - WebSocket connections, notifications, duplex RPC transport
//! - `client` - WebSocket RPC client
//! - `state` - Per-request key/value store
//! - `types` - Ordered parameter multimap
//! - `logging` - Log subscriber setup
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod codec;
pub mod coerce;
pub mod context;
pub mod error;
pub mod guard;
pub mod handler;
pub mod json;
pub mod logging;
pub mod middleware;
mod pool;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod rpc;
pub mod server;
pub mod socket;
pub mod state;
pub mod types;

pub use client::Client;
pub use codec::{Codec, MediaType};
pub use coerce::{Coerce, CoerceError, FromParams, Json};
pub use context::{default_error_handler, Context, ErrorHandler};
pub use error::{Error, Result};
pub use guard::{Attribute, Condition, Guarded, MiddlewareExt, Test};
pub use handler::{BoxFuture, BoxedHandler, Handler};
pub use json::{parse_json, to_json};
pub use logging::LogFormat;
pub use middleware::{
    BodyLimit, ContentTypes, Logging, Middleware, MiddlewareChain, Next, PoweredBy, Recover,
    RequestId, Timeout,
};
pub use request::Request;
pub use response::Response;
pub use route::Route;
pub use router::{Method, Router};
pub use rpc::{RpcEndpoint, RpcError, RpcRequest, RpcResponse, Service};
pub use server::{Server, ServerConfig};
pub use socket::{Connection, Heartbeat, Notifier, Socket, Upgrade};
pub use state::Store;
pub use types::Params;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.1");
    }
}
