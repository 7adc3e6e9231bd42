//! Fixed-window rate limiting middleware.
//!
//! # Algorithm
//! - Each key has a count and a window expiry held by the store
//! - A hit past expiry restarts the window at count 1
//! - A hit inside the window increments the count
//! - A post-increment count above `max_requests` is rejected with 429
//!
//! # Design Decisions
//! - Check-and-increment is one store operation, so concurrent hits on a
//!   key can never both pass the threshold
//! - Presets are plain `RateLimitRule` values
//! - Store errors fail open and are logged; key errors fail closed onto the
//!   global key
//! - The key is derived before the first await, so the middleware future
//!   never borrows the request body across a suspension point

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tokio::time::{Duration, Instant};

use crate::config::{RateLimitConfig, RateLimitPresetName, RateLimitRuleConfig};
use crate::observability::metrics;
use crate::routing::matcher::PathPrefixMatcher;
use crate::security::keys::{KeyStrategy, TrustedProxies};
use crate::security::store::{RateLimitEntry, RateLimitStore};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitConfigError {
    #[error("rate limit rule '{rule}': invalid header name '{name}'")]
    InvalidHeaderName { rule: String, name: String },

    #[error("invalid trusted proxy address '{0}'")]
    InvalidTrustedProxy(String),
}

/// Window length and request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub window: Duration,
    pub max_requests: u64,
}

impl RateLimitRule {
    pub const fn new(window: Duration, max_requests: u64) -> Self {
        Self {
            window,
            max_requests,
        }
    }

    /// Expensive AI-backed endpoints.
    pub const AI: Self = Self::new(Duration::from_secs(60), 10);
    /// General API traffic.
    pub const STANDARD: Self = Self::new(Duration::from_secs(60), 100);
    /// Static assets.
    pub const STATIC_ASSETS: Self = Self::new(Duration::from_secs(60), 1000);
    /// Health checks.
    pub const HEALTH: Self = Self::new(Duration::from_secs(60), 300);
    /// Credential exchange.
    pub const AUTH: Self = Self::new(Duration::from_secs(15 * 60), 5);

    /// Resolve a configured rule. Explicit values override the preset.
    pub fn from_config(rule: &RateLimitRuleConfig) -> Self {
        let base = rule.preset.map(Self::from).unwrap_or(Self::STANDARD);
        Self {
            window: rule.window_secs.map(Duration::from_secs).unwrap_or(base.window),
            max_requests: rule.max_requests.unwrap_or(base.max_requests),
        }
    }
}

impl From<RateLimitPresetName> for RateLimitRule {
    fn from(preset: RateLimitPresetName) -> Self {
        match preset {
            RateLimitPresetName::Ai => Self::AI,
            RateLimitPresetName::Standard => Self::STANDARD,
            RateLimitPresetName::StaticAssets => Self::STATIC_ASSETS,
            RateLimitPresetName::Health => Self::HEALTH,
            RateLimitPresetName::Auth => Self::AUTH,
        }
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        limit: u64,
        remaining: u64,
        reset_after: Duration,
    },
    Limited {
        limit: u64,
        retry_after: Duration,
        window: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Whole seconds for `Retry-After`: rounded up, within `1..=window`.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Allowed { .. } => None,
            Self::Limited {
                retry_after,
                window,
                ..
            } => {
                let max = ceil_secs(*window).max(1);
                Some(ceil_secs(*retry_after).clamp(1, max))
            }
        }
    }

    fn apply_headers(&self, headers: &mut HeaderMap) {
        let (limit, remaining) = match self {
            Self::Allowed {
                limit, remaining, ..
            } => (*limit, *remaining),
            Self::Limited { limit, .. } => (*limit, 0),
        };
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
        if let Some(secs) = self.retry_after_secs() {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Everything a limiter needs.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Namespaces keys in the store and labels metrics.
    pub name: String,
    pub rule: RateLimitRule,
    pub key: KeyStrategy,
    /// Peers whose forwarding and identity headers are believed.
    pub trusted: TrustedProxies,
    pub store: Arc<dyn RateLimitStore>,
}

/// A single rate limiter over one store namespace.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    rule: RateLimitRule,
    key: KeyStrategy,
    trusted: TrustedProxies,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            name: config.name,
            rule: config.rule,
            key: config.key,
            trusted: config.trusted,
            store: config.store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> RateLimitRule {
        self.rule
    }

    /// Record a hit for an already-derived key.
    pub async fn check_key(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let store_key = format!("{}:{}", self.name, key);
        match self.store.increment(&store_key, self.rule.window, now).await {
            Ok(entry) => self.decide(&entry, now),
            Err(e) => {
                tracing::error!(limiter = %self.name, error = %e, "Rate limit store failed, allowing request");
                RateLimitDecision::Allowed {
                    limit: self.rule.max_requests,
                    remaining: self.rule.max_requests,
                    reset_after: self.rule.window,
                }
            }
        }
    }

    /// The bucket `request` counts against.
    pub fn key_for(&self, request: &Request<Body>) -> String {
        self.key.key_for(request, &self.trusted)
    }

    fn decide(&self, entry: &RateLimitEntry, now: Instant) -> RateLimitDecision {
        let reset_after = entry.expires_at.saturating_duration_since(now);
        if entry.count > self.rule.max_requests {
            RateLimitDecision::Limited {
                limit: self.rule.max_requests,
                retry_after: reset_after,
                window: self.rule.window,
            }
        } else {
            RateLimitDecision::Allowed {
                limit: self.rule.max_requests,
                remaining: self.rule.max_requests - entry.count,
                reset_after,
            }
        }
    }
}

/// Limiters selected per request by longest path prefix.
#[derive(Debug, Default)]
pub struct RateLimitPolicy {
    scopes: Vec<(PathPrefixMatcher, Arc<RateLimiter>)>,
}

impl RateLimitPolicy {
    pub fn new(mut scopes: Vec<(PathPrefixMatcher, Arc<RateLimiter>)>) -> Self {
        scopes.sort_by_key(|(matcher, _)| std::cmp::Reverse(matcher.prefix().len()));
        Self { scopes }
    }

    /// One limiter per configured rule, all sharing `store`.
    pub fn from_config(
        config: &RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
    ) -> Result<Self, RateLimitConfigError> {
        let trusted = TrustedProxies::parse(&config.trusted_proxies)?;
        let scopes = config
            .rules
            .iter()
            .map(|rule| {
                let limiter = RateLimiter::new(RateLimiterConfig {
                    name: rule.name.clone(),
                    rule: RateLimitRule::from_config(rule),
                    key: KeyStrategy::from_config(rule)?,
                    trusted: trusted.clone(),
                    store: store.clone(),
                });
                Ok((PathPrefixMatcher::new(&rule.path_prefix), Arc::new(limiter)))
            })
            .collect::<Result<Vec<_>, RateLimitConfigError>>()?;
        Ok(Self::new(scopes))
    }

    pub fn limiter_for(&self, path: &str) -> Option<&Arc<RateLimiter>> {
        self.scopes
            .iter()
            .find(|(matcher, _)| matcher.matches_path(path))
            .map(|(_, limiter)| limiter)
    }
}

async fn enforce(limiter: &RateLimiter, request: Request<Body>, next: Next) -> Response {
    let key = limiter.key_for(&request);
    let decision = limiter.check_key(&key).await;
    if decision.is_allowed() {
        let mut response = next.run(request).await;
        decision.apply_headers(response.headers_mut());
        return response;
    }

    let retry_after = decision.retry_after_secs().unwrap_or(1);
    tracing::warn!(
        limiter = %limiter.name(),
        path = %request.uri().path(),
        retry_after,
        "Rate limit exceeded"
    );
    metrics::record_rate_limited(limiter.name());

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "Too many requests", "retry_after": retry_after })),
    )
        .into_response();
    decision.apply_headers(response.headers_mut());
    response
}

/// Middleware for a single limiter.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(&limiter, request, next).await
}

/// Middleware selecting a limiter by path. Unmatched paths pass.
pub async fn rate_limit_policy_middleware(
    State(policy): State<Arc<RateLimitPolicy>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let limiter = policy.limiter_for(request.uri().path()).cloned();
    match limiter {
        Some(limiter) => enforce(&limiter, request, next).await,
        None => next.run(request).await,
    }
}
