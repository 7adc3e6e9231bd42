//! Route definitions and lookup.
//!
//! # Responsibilities
//! - Describe a proxy route (prefix, target, rewrite, websocket, errors)
//! - Expand shared defaults plus per-route overrides into routes
//! - Look up the route owning a request path
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Longest prefix wins, independent of registration order
//! - Two routes claiming the same prefix is a construction error

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::schema::{ProxyConfig, ProxyRouteConfig};
use crate::proxy::error::ErrorStrategy;
use crate::routing::matcher::PathPrefixMatcher;
use crate::routing::rewrite::PathRewrite;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("path prefix '{0}' is claimed by more than one route")]
    DuplicatePrefix(String),

    #[error("route '{route}': invalid target: {source}")]
    InvalidTarget {
        route: String,
        #[source]
        source: url::ParseError,
    },

    #[error("route '{route}': target must be an http:// URL")]
    UnsupportedScheme { route: String },

    #[error("route '{route}': invalid rewrite: {source}")]
    InvalidRewrite {
        route: String,
        #[source]
        source: regex::Error,
    },
}

/// A single prefix → target rule.
#[derive(Debug, Clone)]
pub struct ProxyRoute {
    pub name: String,
    pub matcher: PathPrefixMatcher,
    pub target: Url,
    pub rewrite: PathRewrite,
    pub websocket: bool,
    pub timeout: Duration,
    pub on_error: ErrorStrategy,
}

impl ProxyRoute {
    /// Route with identity rewrite, no websocket, default timeout and
    /// generic error handling.
    pub fn new(path_prefix: &str, target: Url) -> Self {
        Self {
            name: path_prefix.to_string(),
            matcher: PathPrefixMatcher::new(path_prefix),
            target,
            rewrite: PathRewrite::identity(),
            websocket: false,
            timeout: DEFAULT_TIMEOUT,
            on_error: ErrorStrategy::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_rewrite(mut self, rewrite: PathRewrite) -> Self {
        self.rewrite = rewrite;
        self
    }

    pub fn with_websocket(mut self, enabled: bool) -> Self {
        self.websocket = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.on_error = strategy;
        self
    }

    pub fn prefix(&self) -> &str {
        self.matcher.prefix()
    }

    /// Upstream path and query: rewrite applied, then joined onto any base
    /// path carried by the target URL.
    pub fn upstream_path(&self, path_and_query: &str) -> String {
        let rewritten = self.rewrite.apply(path_and_query);
        let base = self.target.path().trim_end_matches('/');
        format!("{base}{rewritten}")
    }

    /// Full upstream URL for `path_and_query` with the given scheme
    /// (`http` or `ws`).
    pub fn upstream_url(&self, scheme: &str, path_and_query: &str) -> String {
        let host = self.target.host_str().unwrap_or_default();
        let authority = match self.target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        format!("{scheme}://{authority}{}", self.upstream_path(path_and_query))
    }
}

/// Options shared by every route in a [`MultiProxyConfig`].
#[derive(Debug, Clone)]
pub struct RouteDefaults {
    pub websocket: bool,
    pub timeout: Duration,
    pub rewrite: PathRewrite,
    pub on_error: ErrorStrategy,
}

impl Default for RouteDefaults {
    fn default() -> Self {
        Self {
            websocket: false,
            timeout: DEFAULT_TIMEOUT,
            rewrite: PathRewrite::identity(),
            on_error: ErrorStrategy::default(),
        }
    }
}

/// Per-route settings. Every `Some` field replaces the default.
#[derive(Debug, Clone)]
pub struct RouteOverride {
    pub target: Url,
    pub name: Option<String>,
    pub websocket: Option<bool>,
    pub timeout: Option<Duration>,
    pub rewrite: Option<PathRewrite>,
    pub on_error: Option<ErrorStrategy>,
}

impl RouteOverride {
    pub fn target(target: Url) -> Self {
        Self {
            target,
            name: None,
            websocket: None,
            timeout: None,
            rewrite: None,
            on_error: None,
        }
    }
}

/// Prefix → target mapping with shared defaults.
#[derive(Debug, Clone, Default)]
pub struct MultiProxyConfig {
    pub defaults: RouteDefaults,
    pub routes: BTreeMap<String, RouteOverride>,
}

impl MultiProxyConfig {
    pub fn route(mut self, prefix: impl Into<String>, route: RouteOverride) -> Self {
        self.routes.insert(prefix.into(), route);
        self
    }

    /// Build from the `[proxy]` config section.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, RouteError> {
        let defaults = RouteDefaults {
            websocket: config.defaults.websocket,
            timeout: Duration::from_secs(config.defaults.timeout_secs),
            ..RouteDefaults::default()
        };

        let mut routes = BTreeMap::new();
        for route in &config.routes {
            let ProxyRouteConfig {
                name,
                path_prefix,
                target,
                websocket,
                timeout_secs,
                rewrite,
            } = route;
            let label = name.clone().unwrap_or_else(|| path_prefix.clone());

            let target = parse_target(&label, target)?;
            let rewrite = if rewrite.is_empty() {
                None
            } else {
                Some(PathRewrite::compile(rewrite).map_err(|source| {
                    RouteError::InvalidRewrite {
                        route: label.clone(),
                        source,
                    }
                })?)
            };

            let entry = RouteOverride {
                target,
                name: Some(label),
                websocket: *websocket,
                timeout: timeout_secs.map(Duration::from_secs),
                rewrite,
                on_error: None,
            };
            if routes.insert(path_prefix.clone(), entry).is_some() {
                return Err(RouteError::DuplicatePrefix(path_prefix.clone()));
            }
        }

        Ok(Self { defaults, routes })
    }

    /// Expand into concrete routes.
    pub fn into_routes(self) -> Vec<ProxyRoute> {
        let defaults = self.defaults;
        self.routes
            .into_iter()
            .map(|(prefix, o)| {
                let route = ProxyRoute::new(&prefix, o.target)
                    .with_websocket(o.websocket.unwrap_or(defaults.websocket))
                    .with_timeout(o.timeout.unwrap_or(defaults.timeout))
                    .with_rewrite(o.rewrite.unwrap_or_else(|| defaults.rewrite.clone()))
                    .with_error_strategy(o.on_error.unwrap_or_else(|| defaults.on_error.clone()));
                match o.name {
                    Some(name) => route.with_name(name),
                    None => route,
                }
            })
            .collect()
    }
}

/// Parse and check a route target URL.
pub fn parse_target(route: &str, raw: &str) -> Result<Url, RouteError> {
    let url = Url::parse(raw).map_err(|source| RouteError::InvalidTarget {
        route: route.to_string(),
        source,
    })?;
    if url.scheme() != "http" || url.host_str().is_none() {
        return Err(RouteError::UnsupportedScheme {
            route: route.to_string(),
        });
    }
    Ok(url)
}

/// Routes ordered longest prefix first.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<ProxyRoute>>,
}

impl RouteTable {
    pub fn new(routes: Vec<ProxyRoute>) -> Result<Self, RouteError> {
        let mut routes: Vec<Arc<ProxyRoute>> = routes.into_iter().map(Arc::new).collect();
        routes.sort_by(|a, b| {
            b.prefix()
                .len()
                .cmp(&a.prefix().len())
                .then_with(|| a.prefix().cmp(b.prefix()))
        });
        if let Some(pair) = routes.windows(2).find(|w| w[0].prefix() == w[1].prefix()) {
            return Err(RouteError::DuplicatePrefix(pair[0].prefix().to_string()));
        }
        Ok(Self { routes })
    }

    /// The route owning `path`, if any.
    pub fn find(&self, path: &str) -> Option<&Arc<ProxyRoute>> {
        self.routes.iter().find(|r| r.matcher.matches_path(path))
    }

    pub fn routes(&self) -> &[Arc<ProxyRoute>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
