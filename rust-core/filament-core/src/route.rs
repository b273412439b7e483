//! # Route Metadata
//!
//! A single registered route: its pattern, its precomputed rank and the
//! handler it dispatches to, plus the matcher that binds path parameters.
//!
//! ## Pattern syntax
//!
//! - literal bytes match themselves, case-sensitively
//! - `:name` captures a non-empty run of bytes up to the next `/`, `:` or `*`
//! - a trailing `*` captures the remainder of the path (possibly empty) under `*`
//!
//! ## Ranking
//!
//! Literal bytes weigh 1, `:` weighs 100 and `*` weighs 10000. Lower ranks are
//! tried first, so literal routes win over parametric ones and parametric
//! routes over wildcards.

use crate::error::{Error, Result};
use crate::handler::BoxedHandler;
use crate::router::Method;
use crate::types::Params;

/// Rank contribution of a literal byte
pub const LITERAL_WEIGHT: u32 = 1;
/// Rank contribution of a `:` parameter marker
pub const PARAM_WEIGHT: u32 = 100;
/// Rank contribution of a `*` wildcard marker
pub const WILDCARD_WEIGHT: u32 = 10_000;
/// Highest rank a pattern may have
pub const MAX_RANK: u32 = 20_000;

/// Key a wildcard capture is bound under
pub const WILDCARD_KEY: &str = "*";

/// A registered route
#[derive(Clone)]
pub struct Route {
    /// HTTP method the route answers
    pub method: Method,
    /// Path pattern as registered (e.g., "/users/:id")
    pub pattern: String,
    /// Precomputed precedence, lower wins
    pub rank: u32,
    /// Handler executed on match
    pub handler: BoxedHandler,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("rank", &self.rank)
            .finish_non_exhaustive()
    }
}

impl Route {
    /// Validate a pattern and build a route from it
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` if the pattern holds more than one
    /// wildcard, a wildcard that is not the final character, an unnamed
    /// parameter, or ranks above [`MAX_RANK`].
    pub fn new(method: Method, pattern: &str, handler: BoxedHandler) -> Result<Self> {
        let rank = validate(pattern)?;
        Ok(Self {
            method,
            pattern: pattern.to_string(),
            rank,
            handler,
        })
    }

    /// Match `path` against this route, returning the bound parameters
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<Params> {
        match_pattern(&self.pattern, path)
    }
}

/// Compute the rank of a pattern without validating it
#[must_use]
pub fn rank(pattern: &str) -> u32 {
    pattern
        .bytes()
        .map(|b| match b {
            b':' => PARAM_WEIGHT,
            b'*' => WILDCARD_WEIGHT,
            _ => LITERAL_WEIGHT,
        })
        .sum()
}

/// Validate a pattern, returning its rank
///
/// # Errors
///
/// Returns `Error::InvalidRoutePattern` describing the first rule broken.
pub fn validate(pattern: &str) -> Result<u32> {
    let invalid = |reason: &str| Error::InvalidRoutePattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let bytes = pattern.as_bytes();
    let wildcards = bytes.iter().filter(|&&b| b == b'*').count();
    if wildcards > 1 {
        return Err(invalid("only one wildcard is allowed"));
    }
    if wildcards == 1 && bytes.last() != Some(&b'*') {
        return Err(invalid("the wildcard must be the final character"));
    }
    for (i, &b) in bytes.iter().enumerate() {
        if b == b':' && bytes.get(i + 1).map_or(true, |&n| is_stop(n)) {
            return Err(invalid("parameters must be named"));
        }
    }

    let rank = rank(pattern);
    if rank > MAX_RANK {
        return Err(invalid("rank exceeds the maximum of 20000"));
    }
    Ok(rank)
}

const fn is_stop(b: u8) -> bool {
    matches!(b, b'/' | b':' | b'*')
}

/// Scan a pattern and a path in lock-step, binding parameters on success
///
/// Once the pattern is consumed the only leftover the path may carry is a
/// single `/`; any other trailing byte, `/users` against `/users.json`
/// included, fails the match.
#[must_use]
pub fn match_pattern(pattern: &str, path: &str) -> Option<Params> {
    let pat = pattern.as_bytes();
    let url = path.as_bytes();
    let mut params = Params::new();
    let (mut p, mut u) = (0, 0);

    while p < pat.len() {
        match pat[p] {
            b':' => {
                let name_end = scan(pat, p + 1);
                let value_end = scan(url, u);
                if value_end == u {
                    return None;
                }
                params.push(&pattern[p + 1..name_end], &path[u..value_end]);
                p = name_end;
                u = value_end;
            }
            b'*' => {
                params.push(WILDCARD_KEY, &path[u..]);
                return Some(params);
            }
            _ => {
                let end = pat[p..]
                    .iter()
                    .position(|&b| b == b':' || b == b'*')
                    .map_or(pat.len(), |i| p + i);
                let len = end - p;
                if url.len() - u < len || pat[p..end] != url[u..u + len] {
                    return None;
                }
                p = end;
                u += len;
            }
        }
    }

    match &url[u..] {
        [] | [b'/'] => Some(params),
        _ => None,
    }
}

fn scan(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| is_stop(b))
        .map_or(bytes.len(), |i| from + i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_weights() {
        assert_eq!(rank("/users"), 6);
        assert_eq!(rank("/users/:id"), 108);
        assert_eq!(rank("/files/*"), 10_007);
    }

    #[test]
    fn test_literal_match() {
        assert!(match_pattern("/users/list", "/users/list").is_some());
        assert!(match_pattern("/users/list", "/users/lisT").is_none());
        assert!(match_pattern("/users/list", "/users").is_none());
    }

    #[test]
    fn test_param_binding() {
        let params = match_pattern("/users/:id", "/users/42").unwrap();
        assert_eq!(params.get("id"), Some("42"));
    }

    #[test]
    fn test_multiple_params() {
        let params = match_pattern("/a/:x/b/:y", "/a/1/b/2").unwrap();
        assert_eq!(params.get("x"), Some("1"));
        assert_eq!(params.get("y"), Some("2"));
    }

    #[test]
    fn test_empty_param_fails() {
        assert!(match_pattern("/users/:id", "/users/").is_none());
        assert!(match_pattern("/a/:x/b", "/a//b").is_none());
    }

    #[test]
    fn test_wildcard_binding() {
        let params = match_pattern("/files/*", "/files/a/b.txt").unwrap();
        assert_eq!(params.get("*"), Some("a/b.txt"));

        let params = match_pattern("/files/*", "/files/").unwrap();
        assert_eq!(params.get("*"), Some(""));
    }

    #[test]
    fn test_trailing_slash_tolerance() {
        assert!(match_pattern("/users", "/users/").is_some());
        assert!(match_pattern("/users/:id", "/users/42/").is_some());
        assert!(match_pattern("/users", "/users/x").is_none());
        assert!(match_pattern("/users", "/users//").is_none());
        assert!(match_pattern("/users", "/users.").is_none());
        assert!(match_pattern("/users/:id", "/users/42x").is_some());
    }

    #[test]
    fn test_validation_rules() {
        assert!(validate("/a/*/b/*").is_err());
        assert!(validate("/a/*/b").is_err());
        assert!(validate("/a/:/b").is_err());
        assert!(validate("/:a/:b/*").is_ok());

        let long = "/".to_string() + &":p/".repeat(201);
        assert!(validate(&long).is_err());
    }
}
