//! # Handlers
//!
//! A handler is an async function over the request [`Context`]. Handlers are
//! type-erased behind [`BoxedHandler`] so that routes, middleware wrappers and
//! fallbacks can be stored side by side.
//!
//! Any `fn(&mut Context) -> BoxFuture<'_, Result<()>>` is a handler:
//!
//! ```ignore
//! fn hello(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
//!     Box::pin(async move { ctx.text(200, "hello") })
//! }
//! ```

use crate::context::Context;
use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed, sendable future borrowed for `'a`
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Request handler
pub trait Handler: Send + Sync + 'static {
    /// Process the request held by `ctx`
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        (self)(ctx)
    }
}

/// Shared, type-erased handler
pub type BoxedHandler = Arc<dyn Handler>;

/// Fallback used when no route matched
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

impl Handler for NotFound {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            Err(Error::RouteNotFound {
                path: ctx.request().path().to_string(),
            })
        })
    }
}

/// Fallback used when the path matched under other methods only
#[derive(Debug, Clone)]
pub struct MethodNotAllowed {
    allow: String,
}

impl MethodNotAllowed {
    /// Create the fallback with the value of the `Allow` header
    #[must_use]
    pub fn new(allow: impl Into<String>) -> Self {
        Self {
            allow: allow.into(),
        }
    }
}

impl Handler for MethodNotAllowed {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            ctx.response_mut().set_header("Allow", &self.allow);
            Err(Error::MethodNotAllowed {
                method: ctx.request().method().to_string(),
                path: ctx.request().path().to_string(),
            })
        })
    }
}
