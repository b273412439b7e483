//! # Router
//!
//! Rank-ordered router. Routes are grouped per HTTP method and kept sorted by
//! ascending rank (stable, so equal ranks keep registration order); the first
//! route whose pattern matches the path wins.
//!
//! ## Features
//!
//! - Path parameter extraction (`/users/:id`)
//! - Trailing wildcard routes (`/files/*`)
//! - Literal routes take precedence over parametric ones regardless of
//!   registration order
//! - Optional `405 Method Not Allowed` detection

use crate::error::{Error, Result};
use crate::handler::{BoxedHandler, Handler, MethodNotAllowed, NotFound};
use crate::route::Route;
use crate::rpc::{RpcEndpoint, Service};
use crate::types::Params;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// HTTP methods supported by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP HEAD
    Head,
    /// HTTP GET
    Get,
    /// HTTP PUT
    Put,
    /// HTTP POST
    Post,
    /// HTTP PATCH
    Patch,
    /// HTTP TRACE
    Trace,
    /// HTTP DELETE
    Delete,
    /// HTTP OPTIONS
    Options,
    /// HTTP CONNECT
    Connect,
}

impl Method {
    /// Every supported method
    pub const ALL: [Self; 9] = [
        Self::Head,
        Self::Get,
        Self::Put,
        Self::Post,
        Self::Patch,
        Self::Trace,
        Self::Delete,
        Self::Options,
        Self::Connect,
    ];

    /// Canonical upper-case name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "HEAD",
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Trace => "TRACE",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Connect => "CONNECT",
        }
    }

    /// Map a hyper method, `None` for extension methods
    #[must_use]
    pub fn from_hyper(method: &hyper::Method) -> Option<Self> {
        method.as_str().parse().ok()
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::MethodNotAllowed {
                method: s.to_string(),
                path: String::new(),
            })
    }
}

/// Result of a route lookup
pub struct Match {
    /// Handler to run (a fallback when nothing matched)
    pub handler: BoxedHandler,
    /// Parameters bound by the matched route
    pub params: Params,
    /// Pattern of the matched route, `None` for fallbacks
    pub pattern: Option<String>,
}

impl std::fmt::Debug for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Match")
            .field("params", &self.params)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// HTTP router
///
/// Configure it with `&mut self` methods, then hand it to a
/// [`Server`](crate::server::Server), which shares it read-only.
#[derive(Clone)]
pub struct Router {
    routes: HashMap<Method, Vec<Route>>,
    detect_method_not_allowed: bool,
    not_found: BoxedHandler,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a new empty router
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            detect_method_not_allowed: false,
            not_found: Arc::new(NotFound),
        }
    }

    /// Answer `405` instead of `404` when the path matches under another method
    pub fn detect_method_not_allowed(&mut self, enabled: bool) -> &mut Self {
        self.detect_method_not_allowed = enabled;
        self
    }

    /// Replace the handler used when no route matches
    pub fn set_not_found<H: Handler>(&mut self, handler: H) -> &mut Self {
        self.not_found = Arc::new(handler);
        self
    }

    /// Register a route
    ///
    /// # Panics
    ///
    /// Panics if the pattern is invalid; an invalid route table is a
    /// programming error. Use [`Router::try_add`] to handle it instead.
    pub fn add<H: Handler>(&mut self, method: Method, pattern: &str, handler: H) -> &mut Self {
        self.add_boxed(method, pattern, Arc::new(handler))
    }

    /// Register a route, reporting invalid patterns
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern is malformed
    pub fn try_add<H: Handler>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self> {
        self.insert(Route::new(method, pattern, Arc::new(handler))?);
        Ok(self)
    }

    fn add_boxed(&mut self, method: Method, pattern: &str, handler: BoxedHandler) -> &mut Self {
        let route = Route::new(method, pattern, handler)
            .unwrap_or_else(|e| panic!("failed to register route {method} {pattern}: {e}"));
        self.insert(route);
        self
    }

    fn insert(&mut self, route: Route) {
        let routes = self.routes.entry(route.method).or_default();
        routes.push(route);
        routes.sort_by_key(|r| r.rank);
    }

    /// Find the handler for a request
    ///
    /// Never fails: when nothing matches, the returned handler produces the
    /// appropriate `404`/`405` error.
    #[must_use]
    pub fn find(&self, method: Method, path: &str) -> Match {
        if let Some(routes) = self.routes.get(&method) {
            for route in routes {
                if let Some(params) = route.matches(path) {
                    return Match {
                        handler: Arc::clone(&route.handler),
                        params,
                        pattern: Some(route.pattern.clone()),
                    };
                }
            }
        }

        if self.detect_method_not_allowed {
            let allowed = self.allowed_methods(path);
            if !allowed.is_empty() {
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Match {
                    handler: Arc::new(MethodNotAllowed::new(allow)),
                    params: Params::new(),
                    pattern: None,
                };
            }
        }

        Match {
            handler: Arc::clone(&self.not_found),
            params: Params::new(),
            pattern: None,
        }
    }

    /// Methods with at least one route matching `path`
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        Method::ALL
            .into_iter()
            .filter(|m| {
                self.routes
                    .get(m)
                    .is_some_and(|routes| routes.iter().any(|r| r.matches(path).is_some()))
            })
            .collect()
    }

    /// Registered routes for a method, in match order
    #[must_use]
    pub fn routes(&self, method: Method) -> &[Route] {
        self.routes.get(&method).map_or(&[][..], Vec::as_slice)
    }

    /// Convenience method to add a HEAD route
    pub fn head<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.add(Method::Head, pattern, handler)
    }

    /// Convenience method to add a GET route
    pub fn get<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.add(Method::Get, pattern, handler)
    }

    /// Convenience method to add a PUT route
    pub fn put<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.add(Method::Put, pattern, handler)
    }

    /// Convenience method to add a POST route
    pub fn post<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.add(Method::Post, pattern, handler)
    }

    /// Convenience method to add a PATCH route
    pub fn patch<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.add(Method::Patch, pattern, handler)
    }

    /// Convenience method to add a TRACE route
    pub fn trace<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.add(Method::Trace, pattern, handler)
    }

    /// Convenience method to add a DELETE route
    pub fn delete<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.add(Method::Delete, pattern, handler)
    }

    /// Convenience method to add an OPTIONS route
    pub fn options<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.add(Method::Options, pattern, handler)
    }

    /// Convenience method to add a CONNECT route
    pub fn connect<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.add(Method::Connect, pattern, handler)
    }

    /// Register the same handler under every method
    pub fn any<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        let handler: BoxedHandler = Arc::new(handler);
        for method in Method::ALL {
            self.add_boxed(method, pattern, Arc::clone(&handler));
        }
        self
    }

    /// Mount an RPC service: `POST` for single calls, `GET` for sockets
    pub fn rpc(&mut self, pattern: &str, service: Arc<Service>) -> &mut Self {
        let endpoint: BoxedHandler = Arc::new(RpcEndpoint::new(service));
        self.add_boxed(Method::Post, pattern, Arc::clone(&endpoint));
        self.add_boxed(Method::Get, pattern, endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::handler::BoxFuture;
    use crate::request::Request;

    fn list(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { ctx.text(200, "list") })
    }

    fn show(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let id = ctx.param("id").unwrap_or_default().to_string();
            ctx.text(200, id)
        })
    }

    fn files(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let rest = ctx.param("*").unwrap_or_default().to_string();
            ctx.text(200, rest)
        })
    }

    async fn run(router: &Router, method: Method, path: &str) -> (Result<()>, Context) {
        let found = router.find(method, path);
        let mut ctx = Context::from_request(Request::new(method, path));
        ctx.set_params(found.params);
        let result = found.handler.call(&mut ctx).await;
        (result, ctx)
    }

    #[tokio::test]
    async fn test_path_parameters() {
        let mut router = Router::new();
        router.get("/users/:id", show);

        let (result, ctx) = run(&router, Method::Get, "/users/42").await;
        result.unwrap();
        assert_eq!(ctx.response().body(), b"42");
    }

    #[tokio::test]
    async fn test_literal_beats_param_in_any_order() {
        let mut router = Router::new();
        router.get("/users/:id", show);
        router.get("/users/list", list);

        let (_, ctx) = run(&router, Method::Get, "/users/list").await;
        assert_eq!(ctx.response().body(), b"list");

        let mut router = Router::new();
        router.get("/users/list", list);
        router.get("/users/:id", show);

        let (_, ctx) = run(&router, Method::Get, "/users/list").await;
        assert_eq!(ctx.response().body(), b"list");
        let (_, ctx) = run(&router, Method::Get, "/users/7").await;
        assert_eq!(ctx.response().body(), b"7");
    }

    #[tokio::test]
    async fn test_wildcard() {
        let mut router = Router::new();
        router.get("/files/*", files);

        let (_, ctx) = run(&router, Method::Get, "/files/a/b.txt").await;
        assert_eq!(ctx.response().body(), b"a/b.txt");
        let (_, ctx) = run(&router, Method::Get, "/files/").await;
        assert_eq!(ctx.response().body(), b"");
    }

    #[test]
    fn test_equal_ranks_keep_registration_order() {
        let mut router = Router::new();
        router.get("/:a", list);
        router.get("/:b", show);

        let found = router.find(Method::Get, "/x");
        assert_eq!(found.pattern.as_deref(), Some("/:a"));
        assert_eq!(found.params.get("a"), Some("x"));
    }

    #[tokio::test]
    async fn test_route_not_found() {
        let router = Router::new();
        let (result, _) = run(&router, Method::Get, "/nonexistent").await;
        assert_eq!(result.unwrap_err().status(), 404);
    }

    #[tokio::test]
    async fn test_method_not_allowed_is_opt_in() {
        let mut router = Router::new();
        router.get("/users", list);

        let (result, _) = run(&router, Method::Post, "/users").await;
        assert_eq!(result.unwrap_err().status(), 404);

        router.detect_method_not_allowed(true);
        let (result, ctx) = run(&router, Method::Post, "/users").await;
        assert_eq!(result.unwrap_err().status(), 405);
        assert_eq!(ctx.response().header("allow"), Some("GET"));
    }

    #[test]
    fn test_any_registers_every_method() {
        let mut router = Router::new();
        router.any("/ping", list);
        for method in Method::ALL {
            assert_eq!(router.routes(method).len(), 1);
        }
    }

    #[test]
    #[should_panic(expected = "failed to register route")]
    fn test_double_wildcard_panics() {
        let mut router = Router::new();
        router.get("/a/*/b/*", list);
    }

    #[test]
    #[should_panic(expected = "failed to register route")]
    fn test_inner_wildcard_panics() {
        let mut router = Router::new();
        router.get("/a/*/b", list);
    }

    #[test]
    fn test_try_add_reports_error() {
        let mut router = Router::new();
        let err = router.try_add(Method::Get, "/a/*/b", list).err().unwrap();
        assert!(matches!(err, Error::InvalidRoutePattern { .. }));
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("PATCH".parse::<Method>().unwrap(), Method::Patch);
        assert!("BREW".parse::<Method>().is_err());
        assert_eq!(Method::from_hyper(&hyper::Method::DELETE), Some(Method::Delete));
    }
}
