//! # Error Handling
//!
//! Centralized error types for Filament core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Every error maps onto an HTTP status through [`Error::status`], which is what the
//! centralized error handler writes when a handler chain fails.

use thiserror::Error;

/// Result type alias for Filament operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Filament runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Server failed to bind to the specified address
    #[error("Failed to bind server to {address}: {source}")]
    BindError {
        /// The address we tried to bind to
        address: String,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Router failed to match the requested path
    #[error("No route found for path: {path}")]
    RouteNotFound {
        /// The path that wasn't matched
        path: String,
    },

    /// The path matched a route registered under a different method
    #[error("Method {method} not allowed for path: {path}")]
    MethodNotAllowed {
        /// The request method
        method: String,
        /// The request path
        path: String,
    },

    /// Invalid route pattern provided
    #[error("Invalid route pattern: {pattern}: {reason}")]
    InvalidRoutePattern {
        /// The invalid pattern
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Explicit HTTP failure raised by a handler or middleware
    #[error("{message}")]
    Http {
        /// Status code to respond with
        code: u16,
        /// Message written to the response body
        message: String,
    },

    /// Request body could not be decoded into the requested type
    #[error("Failed to decode {media} body: {reason}")]
    Decode {
        /// Media type the body was decoded as
        media: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Value could not be encoded for the response
    #[error("Failed to encode {media} body: {reason}")]
    Encode {
        /// Media type the value was encoded as
        media: &'static str,
        /// Encoder message
        reason: String,
    },

    /// WebSocket upgrade was refused
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// WebSocket transport error
    #[error("Socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Socket peer did not accept a heartbeat within the write deadline
    #[error("Heartbeat missed after {millis} ms")]
    Heartbeat {
        /// The write deadline that elapsed
        millis: u128,
    },

    /// The socket connection has already been closed
    #[error("Connection closed")]
    Closed,

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Hyper(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A handler panicked
    #[error("Handler panicked: {message}")]
    Panic {
        /// Panic payload rendered as text
        message: String,
    },

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },
}

impl Error {
    /// Create an HTTP error using the canonical reason phrase as the message
    #[must_use]
    pub fn http(code: u16) -> Self {
        let message = hyper::StatusCode::from_u16(code)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Unknown Status")
            .to_string();
        Self::Http { code, message }
    }

    /// Create an HTTP error with a custom message
    #[must_use]
    pub fn http_with(code: u16, message: impl Into<String>) -> Self {
        Self::Http {
            code,
            message: message.into(),
        }
    }

    /// Convert a caught panic payload into an error
    #[must_use]
    pub fn panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Panic { message }
    }

    /// HTTP status code this error is reported with
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::RouteNotFound { .. } => 404,
            Self::MethodNotAllowed { .. } => 405,
            Self::Decode { .. } | Self::Protocol(_) => 400,
            Self::PayloadTooLarge { .. } => 413,
            Self::Http { code, .. } => *code,
            _ => 500,
        }
    }

    /// Message exposed to the client
    ///
    /// Server-side failures are reported with the status reason only.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Http { message, .. } => message.clone(),
            Self::RouteNotFound { .. }
            | Self::MethodNotAllowed { .. }
            | Self::Decode { .. }
            | Self::Protocol(_)
            | Self::PayloadTooLarge { .. } => self.to_string(),
            _ => "Internal Server Error".to_string(),
        }
    }
}
