//! # Middleware System
//!
//! Middleware wraps the matched handler. Each middleware receives the
//! context and a [`Next`] continuation; it may act before and after calling
//! `next`, short-circuit by not calling it, or call it more than once.
//!
//! The first middleware added is the outermost: with `A` then `B` registered
//! the order is A-enter, B-enter, handler, B-exit, A-exit.
//!
//! ## Design Principles (SOLID)
//!
//! - **S**: Each middleware has a single responsibility
//! - **O**: Extensible via Middleware trait
//! - **D**: Server depends on abstract trait, not concrete implementations

use crate::codec::MediaType;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{BoxFuture, Handler};
use futures_util::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Middleware trait for request/response interception
pub trait Middleware: Send + Sync + 'static {
    /// Process the request, delegating to `next` for the rest of the chain
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>>;

    /// Middleware name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

impl<F> Middleware for F
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        (self)(ctx, next)
    }
}

/// The remainder of a middleware chain
#[derive(Clone, Copy)]
pub struct Next<'a> {
    endpoint: &'a dyn Handler,
    rest: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// Run the remaining middleware and then the handler
    pub fn run<'b>(mut self, ctx: &'b mut Context) -> BoxFuture<'b, Result<()>>
    where
        'a: 'b,
    {
        if let Some((current, rest)) = self.rest.split_first() {
            self.rest = rest;
            current.handle(ctx, self)
        } else {
            self.endpoint.call(ctx)
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next").field("remaining", &self.rest.len()).finish()
    }
}

/// Middleware chain for processing requests
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Create a new empty middleware chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the chain
    pub fn add<M: Middleware>(&mut self, middleware: M) {
        debug!(middleware = middleware.name(), "Middleware added");
        self.middlewares.push(Arc::new(middleware));
    }

    /// Run `endpoint` wrapped in every middleware of the chain
    pub fn run<'a>(&'a self, endpoint: &'a dyn Handler, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
        Next {
            endpoint,
            rest: &self.middlewares,
        }
        .run(ctx)
    }

    /// Names of the registered middleware, outermost first
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Get the number of middlewares
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Check if chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Logging middleware - one structured record per request
///
/// Errors from the inner chain are handed to the error handler here, so the
/// logged status is the one the client receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct Logging;

impl Middleware for Logging {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Err(err) = next.run(ctx).await {
                ctx.error(&err);
            }
            let method = if ctx.socket().is_some() {
                "SOCK"
            } else {
                ctx.request().method().as_str()
            };
            info!(
                status = ctx.response().status(),
                ip = %ctx.ip(),
                method = method,
                path = %ctx.request().path(),
                elapsed_ms = %ctx.request().start().elapsed().as_millis(),
                size = ctx.response().size(),
                request_id = %ctx.uniq(),
                "Request handled"
            );
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "Logging"
    }
}

/// Recover middleware - turns panics in the inner chain into `Error::Panic`
#[derive(Debug, Default, Clone, Copy)]
pub struct Recover;

impl Middleware for Recover {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match AssertUnwindSafe(next.run(ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    let err = Error::panic(&*payload);
                    error!(path = %ctx.request().path(), error = %err, "Handler panicked");
                    Err(err)
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "Recover"
    }
}

/// Request id middleware - exposes the context id as the `Request-Id` header
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestId;

impl Middleware for RequestId {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        let id = ctx.uniq().to_string();
        ctx.response_mut().set_header("Request-Id", &id);
        next.run(ctx)
    }

    fn name(&self) -> &'static str {
        "RequestId"
    }
}

/// Powered-by middleware - sets `X-Powered-By`
#[derive(Debug, Clone)]
pub struct PoweredBy {
    value: String,
}

impl Default for PoweredBy {
    fn default() -> Self {
        Self::new("filament")
    }
}

impl PoweredBy {
    /// Create the middleware with a header value
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Middleware for PoweredBy {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        ctx.response_mut().set_header("X-Powered-By", &self.value);
        next.run(ctx)
    }

    fn name(&self) -> &'static str {
        "PoweredBy"
    }
}

/// Content type middleware - rejects request media types outside an allow-list with `415`
///
/// An empty allow-list lets everything through.
#[derive(Debug, Default, Clone)]
pub struct ContentTypes {
    allowed: HashSet<String>,
}

impl ContentTypes {
    /// Allow the given media types (`application/json`, ...)
    #[must_use]
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Allow the given media types
    #[must_use]
    pub fn media(allowed: &[MediaType]) -> Self {
        Self::new(allowed.iter().map(MediaType::as_str))
    }
}

impl Middleware for ContentTypes {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        if self.allowed.is_empty() || self.allowed.contains(&ctx.kind()) {
            return next.run(ctx);
        }
        Box::pin(async move { Err(Error::http(415)) })
    }

    fn name(&self) -> &'static str {
        "ContentTypes"
    }
}

/// Body limit middleware - rejects a declared `Content-Length` above the limit with `413`
///
/// Sockets and a zero limit pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct BodyLimit {
    limit: usize,
}

impl BodyLimit {
    /// Create the middleware with a limit in bytes
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl Middleware for BodyLimit {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        if self.limit == 0 || ctx.is_socket() {
            return next.run(ctx);
        }
        match ctx.request().content_length() {
            Some(actual) if actual > self.limit => {
                let limit = self.limit;
                Box::pin(async move { Err(Error::PayloadTooLarge { limit, actual }) })
            }
            _ => next.run(ctx),
        }
    }

    fn name(&self) -> &'static str {
        "BodyLimit"
    }
}

/// Timeout middleware - cancels the request token after a deadline
///
/// Handlers observe the deadline through [`Context::token`]. WebSocket
/// upgrade requests and a zero duration pass untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    /// Create the middleware with a deadline
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Middleware for Timeout {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        if self.duration.is_zero() || ctx.request().is_websocket() {
            return next.run(ctx);
        }
        Box::pin(async move {
            let token = ctx.token().child_token();
            let previous = ctx.replace_token(token.clone());

            let result = {
                let mut run = next.run(ctx);
                tokio::select! {
                    result = &mut run => result,
                    () = tokio::time::sleep(self.duration) => {
                        debug!(deadline = ?self.duration, "Request deadline passed");
                        token.cancel();
                        run.await
                    }
                }
            };

            token.cancel();
            ctx.replace_token(previous);
            result
        })
    }

    fn name(&self) -> &'static str {
        "Timeout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use crate::router::Method;
    use std::sync::Mutex;

    fn ok(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { ctx.text(200, "ok") })
    }

    fn fail(_ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { Err(Error::http(418)) })
    }

    fn boom(_ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { panic!("handler exploded") })
    }

    fn wait_for_cancel(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let token = ctx.token().clone();
            token.cancelled().await;
            ctx.text(503, "cancelled")
        })
    }

    struct Record {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Record {
        fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.log.lock().unwrap().push(format!("{}-enter", self.label));
                let result = next.run(ctx).await;
                self.log.lock().unwrap().push(format!("{}-exit", self.label));
                result
            })
        }
    }

    struct Endpoint {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Handler for Endpoint {
        fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.log.lock().unwrap().push("H".to_string());
                ctx.text(200, "ok")
            })
        }
    }

    struct Twice;

    impl Middleware for Twice {
        fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                next.run(ctx).await?;
                next.run(ctx).await
            })
        }
    }

    fn short_circuit<'a>(ctx: &'a mut Context, _next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { ctx.text(403, "denied") })
    }

    fn get(path: &str) -> Context {
        Context::from_request(Request::new(Method::Get, path))
    }

    #[tokio::test]
    async fn test_first_registered_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.add(Record {
            label: "A",
            log: Arc::clone(&log),
        });
        chain.add(Record {
            label: "B",
            log: Arc::clone(&log),
        });

        let endpoint = Endpoint {
            log: Arc::clone(&log),
        };
        let mut ctx = get("/");
        chain.run(&endpoint, &mut ctx).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["A-enter", "B-enter", "H", "B-exit", "A-exit"]
        );
        assert_eq!(ctx.response().body(), b"ok");
    }

    #[tokio::test]
    async fn test_function_middleware_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.add(short_circuit);
        chain.add(Record {
            label: "inner",
            log: Arc::clone(&log),
        });

        let mut ctx = get("/");
        chain.run(&ok, &mut ctx).await.unwrap();
        assert_eq!(ctx.response().status(), 403);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_next_can_run_twice() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.add(Twice);
        chain.add(Record {
            label: "inner",
            log: Arc::clone(&log),
        });

        let mut ctx = get("/");
        chain.run(&ok, &mut ctx).await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_empty_chain_runs_handler() {
        let chain = MiddlewareChain::new();
        assert!(chain.is_empty());
        let mut ctx = get("/");
        tokio_test::block_on(chain.run(&ok, &mut ctx)).unwrap();
        assert_eq!(ctx.response().status(), 200);
    }

    #[test]
    fn test_logging_reports_errors() {
        let mut chain = MiddlewareChain::new();
        chain.add(Logging);
        let mut ctx = get("/teapot");
        tokio_test::block_on(chain.run(&fail, &mut ctx)).unwrap();
        assert_eq!(ctx.response().status(), 418);
    }

    #[tokio::test]
    async fn test_recover_converts_panics() {
        let mut chain = MiddlewareChain::new();
        chain.add(Recover);
        let mut ctx = get("/");
        let err = chain.run(&boom, &mut ctx).await.unwrap_err();
        assert!(matches!(err, Error::Panic { ref message } if message == "handler exploded"));
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn test_header_middleware() {
        let mut chain = MiddlewareChain::new();
        chain.add(RequestId);
        chain.add(PoweredBy::default());
        let mut ctx = get("/");
        chain.run(&ok, &mut ctx).await.unwrap();
        let id = ctx.uniq().to_string();
        assert_eq!(ctx.response().header("request-id"), Some(id.as_str()));
        assert_eq!(ctx.response().header("x-powered-by"), Some("filament"));
        assert_eq!(chain.names(), vec!["RequestId", "PoweredBy"]);
    }

    #[tokio::test]
    async fn test_content_types() {
        let mut chain = MiddlewareChain::new();
        chain.add(ContentTypes::media(&[MediaType::Json]));

        let mut ctx = Context::from_request(
            Request::new(Method::Post, "/").with_header("Content-Type", "application/xml"),
        );
        let err = chain.run(&ok, &mut ctx).await.unwrap_err();
        assert_eq!(err.status(), 415);

        let mut ctx = Context::from_request(
            Request::new(Method::Post, "/").with_header("Content-Type", "application/json; charset=utf-8"),
        );
        chain.run(&ok, &mut ctx).await.unwrap();

        let open = ContentTypes::default();
        let mut ctx = get("/");
        open.handle(&mut ctx, Next { endpoint: &ok, rest: &[] }).await.unwrap();
        assert_eq!(ctx.response().status(), 200);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let mut chain = MiddlewareChain::new();
        chain.add(BodyLimit::new(4));

        let mut ctx = Context::from_request(
            Request::new(Method::Post, "/").with_header("Content-Length", "10"),
        );
        let err = chain.run(&ok, &mut ctx).await.unwrap_err();
        assert_eq!(err.status(), 413);

        let mut ctx = Context::from_request(
            Request::new(Method::Post, "/").with_header("Content-Length", "3"),
        );
        chain.run(&ok, &mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_cancels_token() {
        let mut chain = MiddlewareChain::new();
        chain.add(Timeout::new(Duration::from_millis(20)));
        let mut ctx = get("/slow");
        let outer = ctx.token().clone();

        chain.run(&wait_for_cancel, &mut ctx).await.unwrap();
        assert_eq!(ctx.response().status(), 503);
        assert!(!outer.is_cancelled());
        assert!(!ctx.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_timeout_leaves_fast_handlers_alone() {
        let mut chain = MiddlewareChain::new();
        chain.add(Timeout::new(Duration::from_secs(5)));
        let mut ctx = get("/fast");

        let started = std::time::Instant::now();
        chain.run(&ok, &mut ctx).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(ctx.response().status(), 200);
        assert!(!ctx.token().is_cancelled());
    }
}
