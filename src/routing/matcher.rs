//! Request matching logic.
//!
//! # Responsibilities
//! - Match path prefix on segment boundaries (case-sensitive)
//! - Evaluate caller-supplied predicates for conditional proxies
//!
//! # Design Decisions
//! - `/api` matches `/api` and `/api/...`, never `/apix`
//! - Predicates take `&Request` so they cannot mutate or consume it

use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request<Body>) -> bool;
}

/// Matches the request path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher. A trailing slash is ignored.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        Self {
            prefix: if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            },
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches_path(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return path.starts_with('/');
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.matches_path(req.uri().path())
    }
}

/// Adapts a closure into a [`Matcher`].
#[derive(Clone)]
pub struct FnMatcher {
    name: &'static str,
    predicate: Arc<dyn Fn(&Request<Body>) -> bool + Send + Sync>,
}

impl FnMatcher {
    pub fn new<F>(name: &'static str, predicate: F) -> Self
    where
        F: Fn(&Request<Body>) -> bool + Send + Sync + 'static,
    {
        Self {
            name,
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for FnMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMatcher").field("name", &self.name).finish()
    }
}

impl Matcher for FnMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        (self.predicate)(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::default()).unwrap()
    }

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/api");

        assert!(matcher.matches(&req("http://example.com/api/v1")));
        assert!(matcher.matches(&req("/api")));
        assert!(matcher.matches(&req("/api?x=1")));
        assert!(!matcher.matches(&req("/apix")));
        assert!(!matcher.matches(&req("/images")));
        assert!(!matcher.matches(&req("/API")));
    }

    #[test]
    fn trailing_slash_and_root() {
        assert_eq!(PathPrefixMatcher::new("/api/").prefix(), "/api");

        let root = PathPrefixMatcher::new("/");
        assert!(root.matches_path("/"));
        assert!(root.matches_path("/anything/at/all"));
    }

    #[test]
    fn fn_matcher_delegates() {
        let matcher = FnMatcher::new("has-flag", |r| r.headers().contains_key("x-flag"));
        assert!(!matcher.matches(&req("/")));

        let flagged = Request::builder()
            .uri("/")
            .header("x-flag", "1")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&flagged));
    }
}
