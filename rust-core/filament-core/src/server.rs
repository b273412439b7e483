//! # HTTP Server
//!
//! HTTP server built on Hyper and Tokio.
//! Implements graceful shutdown with signal handling.
//!
//! ## Key Features
//!
//! - Async request handling with Tokio runtime
//! - HTTP/1.1 and HTTP/2 with WebSocket upgrades
//! - Pooled request contexts
//! - Graceful shutdown on Ctrl-C, with a bounded drain

use crate::codec::MediaType;
use crate::context::{default_error_handler, Context, ErrorHandler, Shared};
use crate::error::{Error, Result};
use crate::middleware::{Middleware, MiddlewareChain};
use crate::pool::ContextPool;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use futures_util::FutureExt;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
    /// Number of idle request contexts kept for reuse
    pub pool_capacity: usize,
    /// Media type used when the request does not name a known one
    pub default_media: MediaType,
    /// Interval between WebSocket pings
    pub heartbeat_interval: Duration,
    /// Deadline for a pong or a socket write
    pub write_deadline: Duration,
    /// Queued outbound notifications per socket
    pub notification_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
            pool_capacity: 1024,
            default_media: MediaType::Json,
            heartbeat_interval: Duration::from_secs(30),
            write_deadline: Duration::from_secs(10),
            notification_buffer: 64,
        }
    }
}

/// HTTP server
///
/// ```ignore
/// let mut server = Server::new(ServerConfig::default());
/// server.add_middleware(Logging);
/// server.router_mut().get("/hello", hello);
/// server.serve().await?;
/// ```
pub struct Server {
    router: Router,
    middleware: MiddlewareChain,
    shared: Arc<Shared>,
    pool: ContextPool,
}

impl Default for Server {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.shared.config)
            .field("middleware", &self.middleware)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Create a new Server instance
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let shared = Arc::new(Shared {
            config,
            on_error: Arc::new(default_error_handler),
            shutdown: CancellationToken::new(),
        });
        Self::with_shared(Router::new(), MiddlewareChain::new(), shared)
    }

    fn with_shared(router: Router, middleware: MiddlewareChain, shared: Arc<Shared>) -> Self {
        let pool = ContextPool::new(shared.config.pool_capacity, Arc::clone(&shared));
        Self {
            router,
            middleware,
            shared,
            pool,
        }
    }

    /// Server configuration
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// The router, for registering routes
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Add a middleware to the chain
    pub fn add_middleware<M: Middleware>(&mut self, middleware: M) {
        self.middleware.add(middleware);
    }

    /// Replace the centralized error handler
    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: Fn(&Error, &mut Context) + Send + Sync + 'static,
    {
        let on_error: ErrorHandler = Arc::new(handler);
        let shared = Arc::new(Shared {
            config: self.shared.config.clone(),
            on_error,
            shutdown: self.shared.shutdown.clone(),
        });
        *self = Self::with_shared(
            std::mem::take(&mut self.router),
            std::mem::take(&mut self.middleware),
            shared,
        );
    }

    /// Token cancelled when the server shuts down
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Bind the configured address and serve until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` if the address cannot be bound
    pub async fn serve(self) -> Result<()> {
        let addr = self.shared.config.address;
        let listener = bind(addr).map_err(|source| Error::BindError {
            address: addr.to_string(),
            source,
        })?;
        self.serve_with_shutdown(listener, shutdown_signal()).await
    }

    /// Serve connections from `listener` until `signal` completes
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the listener has no local address
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let local = listener.local_addr()?;
        info!("Server listening on http://{}", local);

        let timeout = self.shared.config.shutdown_timeout;
        let keep_alive = self.shared.config.keep_alive;
        let shutdown = self.shared.shutdown.clone();
        let server = Arc::new(self);
        let active = Arc::new(AtomicUsize::new(0));

        tokio::pin!(signal);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = match accept_result {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(error = %err, "Failed to accept connection");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let server = Arc::clone(&server);
                    let active = Arc::clone(&active);
                    let shutdown = shutdown.clone();

                    active.fetch_add(1, Ordering::Relaxed);
                    tokio::task::spawn(async move {
                        let service = service_fn(move |req| {
                            let server = Arc::clone(&server);
                            async move { Ok::<_, Infallible>(server.handle(req, remote_addr).await) }
                        });

                        let mut builder = auto::Builder::new(TokioExecutor::new());
                        builder.http1().keep_alive(keep_alive);
                        let conn = builder.serve_connection_with_upgrades(io, service);
                        tokio::pin!(conn);

                        let result = tokio::select! {
                            result = conn.as_mut() => result,
                            () = shutdown.cancelled() => {
                                conn.as_mut().graceful_shutdown();
                                conn.as_mut().await
                            }
                        };
                        if let Err(err) = result {
                            debug!(remote = %remote_addr, error = %err, "Error serving connection");
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = &mut signal => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        shutdown.cancel();
        let drain = async {
            loop {
                if active.load(Ordering::Relaxed) == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                remaining = active.load(Ordering::Relaxed),
                "Shutdown timeout reached with open connections"
            );
        }
        Ok(())
    }

    /// Execute a test request directly without network stack
    pub async fn test_request(&self, request: Request) -> Response {
        let limit = self.shared.config.max_body_size;
        if request.body().len() > limit {
            return rejection(&Error::PayloadTooLarge {
                limit,
                actual: request.body().len(),
            });
        }
        self.process(request, None).await
    }

    async fn handle(
        &self,
        mut req: hyper::Request<Incoming>,
        remote: SocketAddr,
    ) -> hyper::Response<Full<Bytes>> {
        let on_upgrade = wants_upgrade(&req).then(|| hyper::upgrade::on(&mut req));
        let request = match Request::from_hyper_with_limit(
            req,
            self.shared.config.max_body_size,
            Some(remote),
        )
        .await
        {
            Ok(request) => request,
            Err(err) => {
                debug!(remote = %remote, error = %err, "Rejected request");
                return rejection(&err).into_hyper();
            }
        };
        self.process(request, on_upgrade).await.into_hyper()
    }

    /// Core request processing logic (network agnostic)
    async fn process(&self, request: Request, on_upgrade: Option<OnUpgrade>) -> Response {
        let mut ctx = self.pool.acquire();
        ctx.reset(request, on_upgrade);

        let found = self.router.find(ctx.request().method(), ctx.request().path());
        ctx.set_params(found.params);
        ctx.set_pattern(found.pattern);

        let caught = AssertUnwindSafe(self.middleware.run(&*found.handler, &mut ctx))
            .catch_unwind()
            .await;
        let outcome = caught.unwrap_or_else(|payload| {
            let err = Error::panic(&*payload);
            error!(path = %ctx.request().path(), error = %err, "Handler panicked");
            Err(err)
        });
        if let Err(err) = outcome {
            ctx.error(&err);
        }

        let response = ctx.take_response();
        self.pool.release(ctx);
        response
    }
}

fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4()?
    } else {
        tokio::net::TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(not(windows))]
    {
        socket.set_reuseport(true)?;
    }
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
}

fn wants_upgrade<B>(req: &hyper::Request<B>) -> bool {
    req.headers()
        .get(hyper::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Response for requests rejected before a context exists
fn rejection(err: &Error) -> Response {
    let mut response = Response::new();
    if matches!(err, Error::MethodNotAllowed { .. }) {
        let allow = crate::router::Method::ALL.map(|m| m.as_str()).join(", ");
        response.set_header("Allow", &allow);
    }
    response.write(
        err.status(),
        Some(MediaType::Text.content_type()),
        err.public_message(),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BoxFuture;
    use crate::middleware::{Logging, Next, RequestId};
    use crate::router::Method;
    use http_body_util::BodyExt;
    use std::sync::Mutex;

    fn hello(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { ctx.text(200, "hello") })
    }

    fn user(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let id = ctx.param("id").unwrap_or_default().to_string();
            let pattern = ctx.path().unwrap_or_default().to_string();
            ctx.json(200, &serde_json::json!({ "id": id, "pattern": pattern }))
        })
    }

    fn remember(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let seen = ctx.store().len();
            ctx.set("visited", true);
            ctx.text(200, seen.to_string())
        })
    }

    fn panics(_ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { panic!("boom") })
    }

    fn forbidden(_ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { Err(Error::http_with(403, "no entry")) })
    }

    fn get(path: &str) -> Request {
        Request::new(Method::Get, path)
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), 8000);
        assert!(config.keep_alive);
        assert_eq!(config.pool_capacity, 1024);
        assert_eq!(config.default_media, MediaType::Json);
        assert_eq!(config.notification_buffer, 64);
    }

    #[tokio::test]
    async fn test_routing_through_server() {
        let mut server = Server::default();
        server.router_mut().get("/hello", hello).get("/users/:id", user);

        let res = server.test_request(get("/hello")).await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.body(), b"hello");

        let res = server.test_request(get("/users/42")).await;
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["id"], "42");
        assert_eq!(body["pattern"], "/users/:id");
    }

    #[tokio::test]
    async fn test_not_found_and_method_not_allowed() {
        let mut server = Server::default();
        server.router_mut().get("/items", hello);

        let res = server.test_request(get("/missing")).await;
        assert_eq!(res.status(), 404);

        let res = server.test_request(Request::new(Method::Post, "/items")).await;
        assert_eq!(res.status(), 404);

        server.router_mut().detect_method_not_allowed(true);
        let res = server.test_request(Request::new(Method::Post, "/items")).await;
        assert_eq!(res.status(), 405);
        assert_eq!(res.header("allow"), Some("GET"));
    }

    #[tokio::test]
    async fn test_errors_reach_the_error_handler() {
        let mut server = Server::default();
        server.router_mut().get("/forbidden", forbidden);
        let res = server.test_request(get("/forbidden")).await;
        assert_eq!(res.status(), 403);
        assert_eq!(res.body(), b"no entry");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        server.set_error_handler(move |err, ctx| {
            record.lock().unwrap().push(err.status());
            let _ = ctx.json(err.status(), &serde_json::json!({ "error": err.public_message() }));
        });
        let res = server.test_request(get("/forbidden")).await;
        assert_eq!(res.status(), 403);
        assert_eq!(res.header("content-type"), Some("application/json; charset=utf-8"));
        assert_eq!(*seen.lock().unwrap(), vec![403]);
    }

    #[tokio::test]
    async fn test_panics_become_internal_errors() {
        let mut server = Server::default();
        server.router_mut().get("/panic", panics).get("/hello", hello);

        let res = server.test_request(get("/panic")).await;
        assert_eq!(res.status(), 500);
        assert_eq!(res.body(), b"Internal Server Error");

        let res = server.test_request(get("/hello")).await;
        assert_eq!(res.status(), 200);
    }

    #[tokio::test]
    async fn test_pooled_contexts_do_not_leak() {
        let mut server = Server::default();
        server.router_mut().get("/remember", remember);
        for _ in 0..3 {
            let res = server.test_request(get("/remember")).await;
            assert_eq!(res.body(), b"0");
        }
    }

    #[tokio::test]
    async fn test_middleware_wraps_fallbacks() {
        let mut server = Server::default();
        server.add_middleware(RequestId);
        server.add_middleware(Logging);

        let res = server.test_request(get("/nowhere")).await;
        assert_eq!(res.status(), 404);
        assert!(res.header("request-id").is_some());
    }

    fn tag<'a>(ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            next.run(ctx).await?;
            ctx.response_mut().map_body(|body| {
                let mut tagged = body.to_vec();
                tagged.extend_from_slice(b"!");
                tagged.into()
            });
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_middleware_rewrites_body() {
        let mut server = Server::default();
        server.add_middleware(tag);
        server.router_mut().get("/hello", hello);
        let res = server.test_request(get("/hello")).await;
        assert_eq!(res.body(), b"hello!");
    }

    #[tokio::test]
    async fn test_oversized_test_request() {
        let config = ServerConfig {
            max_body_size: 4,
            ..ServerConfig::default()
        };
        let mut server = Server::new(config);
        server.router_mut().post("/upload", hello);
        let res = server
            .test_request(Request::new(Method::Post, "/upload").with_body("too large"))
            .await;
        assert_eq!(res.status(), 413);
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut server = Server::default();
        server.router_mut().get("/hello", hello);

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(server.serve_with_shutdown(listener, async move {
            let _ = stopped.await;
        }));

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .unwrap();
        tokio::spawn(conn);

        let req = hyper::Request::builder()
            .uri("/hello")
            .header("host", addr.to_string())
            .body(Full::new(Bytes::new()))
            .unwrap();
        let res = sender.send_request(req).await.unwrap();
        assert_eq!(res.status(), 200);
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello");

        let req = hyper::Request::builder()
            .method("BREW")
            .uri("/hello")
            .header("host", addr.to_string())
            .body(Full::new(Bytes::new()))
            .unwrap();
        let res = sender.send_request(req).await.unwrap();
        assert_eq!(res.status(), 405);

        drop(sender);
        stop.send(()).unwrap();
        running.await.unwrap().unwrap();
    }
}
