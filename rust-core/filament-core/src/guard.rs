//! Conditional middleware
//!
//! [`Guarded`] runs a middleware only when a [`Condition`] on the request
//! holds; otherwise the request goes straight to the rest of the chain.
//!
//! ```ignore
//! server.add_middleware(BodyLimit::new(4096).when(Condition::path(Test::begins_with(["/upload"]))));
//! ```

use crate::context::Context;
use crate::error::Result;
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use regex::Regex;

/// Request attribute a condition looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// `Host` without the port
    Host,
    /// URL path
    Path,
    /// `http` or `https`
    Scheme,
    /// `User-Agent`
    Agent,
    /// Request method
    Method,
}

/// Test applied to the attribute; any listed value matching is enough
#[derive(Debug, Clone)]
pub enum Test {
    /// Exact match
    Is(Vec<String>),
    /// Prefix match
    BeginsWith(Vec<String>),
    /// Suffix match
    EndsWith(Vec<String>),
    /// Regular expression match
    Matches(Vec<Regex>),
}

fn owned<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.into_iter().map(Into::into).collect()
}

impl Test {
    /// Exact match against any of `values`
    pub fn is<I: IntoIterator<Item = S>, S: Into<String>>(values: I) -> Self {
        Self::Is(owned(values))
    }

    /// Prefix match against any of `values`
    pub fn begins_with<I: IntoIterator<Item = S>, S: Into<String>>(values: I) -> Self {
        Self::BeginsWith(owned(values))
    }

    /// Suffix match against any of `values`
    pub fn ends_with<I: IntoIterator<Item = S>, S: Into<String>>(values: I) -> Self {
        Self::EndsWith(owned(values))
    }

    /// Regex match against any of `patterns`
    ///
    /// # Errors
    ///
    /// Returns the first pattern that fails to compile
    pub fn matches<I: IntoIterator<Item = S>, S: AsRef<str>>(patterns: I) -> std::result::Result<Self, regex::Error> {
        patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Self::Matches)
    }

    fn check(&self, value: &str) -> bool {
        match self {
            Self::Is(tests) => tests.iter().any(|t| value == t),
            Self::BeginsWith(tests) => tests.iter().any(|t| value.starts_with(t.as_str())),
            Self::EndsWith(tests) => tests.iter().any(|t| value.ends_with(t.as_str())),
            Self::Matches(tests) => tests.iter().any(|t| t.is_match(value)),
        }
    }
}

/// Predicate over one request attribute
#[derive(Debug, Clone)]
pub struct Condition {
    attribute: Attribute,
    test: Test,
}

impl Condition {
    /// Build a condition
    #[must_use]
    pub const fn new(attribute: Attribute, test: Test) -> Self {
        Self { attribute, test }
    }

    /// Condition on the host
    #[must_use]
    pub const fn host(test: Test) -> Self {
        Self::new(Attribute::Host, test)
    }

    /// Condition on the path
    #[must_use]
    pub const fn path(test: Test) -> Self {
        Self::new(Attribute::Path, test)
    }

    /// Condition on the scheme
    #[must_use]
    pub const fn scheme(test: Test) -> Self {
        Self::new(Attribute::Scheme, test)
    }

    /// Condition on the user agent
    #[must_use]
    pub const fn agent(test: Test) -> Self {
        Self::new(Attribute::Agent, test)
    }

    /// Condition on the method
    #[must_use]
    pub const fn method(test: Test) -> Self {
        Self::new(Attribute::Method, test)
    }

    /// Whether the condition holds for the request in `ctx`
    #[must_use]
    pub fn holds(&self, ctx: &Context) -> bool {
        let req = ctx.request();
        let value = match self.attribute {
            Attribute::Host => req.host(),
            Attribute::Path => req.path(),
            Attribute::Scheme => req.scheme(),
            Attribute::Agent => req.user_agent(),
            Attribute::Method => req.method().as_str(),
        };
        self.test.check(value)
    }
}

/// Middleware that only runs when its condition holds
#[derive(Debug, Clone)]
pub struct Guarded<M> {
    condition: Condition,
    inner: M,
}

impl<M: Middleware> Guarded<M> {
    /// Guard `inner` with `condition`
    #[must_use]
    pub const fn new(condition: Condition, inner: M) -> Self {
        Self { condition, inner }
    }
}

impl<M: Middleware> Middleware for Guarded<M> {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        if self.condition.holds(ctx) {
            self.inner.handle(ctx, next)
        } else {
            next.run(ctx)
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// `.when(condition)` on any middleware
pub trait MiddlewareExt: Middleware + Sized {
    /// Run this middleware only when `condition` holds
    fn when(self, condition: Condition) -> Guarded<Self> {
        Guarded::new(condition, self)
    }
}

impl<M: Middleware> MiddlewareExt for M {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{MiddlewareChain, PoweredBy};
    use crate::request::Request;
    use crate::router::Method;

    fn ok(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { ctx.text(200, "ok") })
    }

    fn request(method: Method, target: &str) -> Context {
        Context::from_request(
            Request::new(method, target)
                .with_header("Host", "api.example.com:8080")
                .with_header("User-Agent", "curl/8.0"),
        )
    }

    #[test]
    fn test_condition_variants() {
        let ctx = request(Method::Get, "/admin/users");
        assert!(Condition::path(Test::is(["/x", "/admin/users"])).holds(&ctx));
        assert!(Condition::path(Test::begins_with(["/admin"])).holds(&ctx));
        assert!(Condition::path(Test::ends_with(["/users"])).holds(&ctx));
        assert!(!Condition::path(Test::begins_with(["/public"])).holds(&ctx));
        assert!(Condition::host(Test::is(["api.example.com"])).holds(&ctx));
        assert!(Condition::host(Test::matches([r"^api\."]).unwrap()).holds(&ctx));
        assert!(Condition::agent(Test::begins_with(["curl/"])).holds(&ctx));
        assert!(Condition::method(Test::is(["GET", "HEAD"])).holds(&ctx));
        assert!(Condition::scheme(Test::is(["http"])).holds(&ctx));
    }

    #[test]
    fn test_invalid_regex() {
        assert!(Test::matches(["("]).is_err());
    }

    #[tokio::test]
    async fn test_guarded_runs_only_when_condition_holds() {
        let mut chain = MiddlewareChain::new();
        chain.add(PoweredBy::default().when(Condition::path(Test::begins_with(["/api"]))));

        let mut ctx = request(Method::Get, "/api/items");
        chain.run(&ok, &mut ctx).await.unwrap();
        assert_eq!(ctx.response().header("x-powered-by"), Some("filament"));

        let mut ctx = request(Method::Get, "/static/app.js");
        chain.run(&ok, &mut ctx).await.unwrap();
        assert_eq!(ctx.response().header("x-powered-by"), None);
        assert_eq!(ctx.response().status(), 200);
    }
}
