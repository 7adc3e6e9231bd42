//! Cross-origin policy.
//!
//! # Responsibilities
//! - Decide whether a request's `Origin` is on the allowlist
//! - Echo CORS headers for allowed origins
//! - Answer preflight requests from allowed origins
//!
//! # Design Decisions
//! - Disallowed origins are not rejected server-side; the missing CORS
//!   headers make the browser block the response
//! - `Access-Control-Allow-Origin` is always the exact origin, never `*`,
//!   because credentials may be involved
//! - Wildcards never match the bare apex domain

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use thiserror::Error;
use url::Url;

use crate::config::{CorsConfig, EmbeddingConfig};
use crate::observability::metrics;

/// Origins Discord uses to host and proxy activities.
pub const DISCORD_ORIGINS: &[&str] = &[
    "https://discord.com",
    "https://ptb.discord.com",
    "https://canary.discord.com",
];

const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const DEFAULT_ALLOWED_HEADERS: &str = "Content-Type, Authorization";

/// Why an allowlist entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OriginError {
    #[error("empty origin")]
    Empty,

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error("missing host")]
    MissingHost,

    #[error("origins cannot carry a path, query or fragment")]
    HasPath,

    #[error("empty scheme")]
    EmptyScheme,

    #[error("wildcards must take the form *.domain.tld")]
    WildcardForm,

    #[error("invalid port")]
    InvalidPort,

    #[error("invalid wildcard domain")]
    WildcardDomain,
}

/// An allowlist entry that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid origin '{origin}': {reason}")]
pub struct InvalidOrigin {
    pub origin: String,
    #[source]
    pub reason: OriginError,
}

/// One allowlist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPattern {
    /// Serialized `scheme://host[:port]`: lowercase host, default port
    /// dropped. Compared byte for byte.
    Exact(String),
    /// `[scheme://]*.domain.tld[:port]`.
    Wildcard {
        scheme: Option<String>,
        domain: String,
        port: Option<u16>,
    },
}

impl OriginPattern {
    /// Parse a configured origin or wildcard pattern, normalized to the
    /// form browsers send in `Origin`.
    pub fn parse(raw: &str) -> Result<Self, OriginError> {
        let raw = raw.trim().trim_end_matches('/');
        if raw.is_empty() {
            return Err(OriginError::Empty);
        }

        if raw.contains('*') {
            return Self::parse_wildcard(raw);
        }

        let url = Url::parse(raw)?;
        let host = url.host_str().ok_or(OriginError::MissingHost)?;
        if !matches!(url.path(), "" | "/") || url.query().is_some() || url.fragment().is_some() {
            return Err(OriginError::HasPath);
        }
        // `Url::origin` is opaque ("null") for non-special schemes.
        let serialized = match url.port() {
            Some(port) => format!("{}://{host}:{port}", url.scheme()),
            None => format!("{}://{host}", url.scheme()),
        };
        Ok(Self::Exact(serialized))
    }

    fn parse_wildcard(raw: &str) -> Result<Self, OriginError> {
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() => (Some(scheme.to_ascii_lowercase()), rest),
            Some(_) => return Err(OriginError::EmptyScheme),
            None => (None, raw),
        };

        let rest = rest.strip_prefix("*.").ok_or(OriginError::WildcardForm)?;
        let (domain, port) = split_port(rest).ok_or(OriginError::InvalidPort)?;

        if domain.is_empty() || domain.contains(['*', '/']) || domain.starts_with('.') {
            return Err(OriginError::WildcardDomain);
        }

        let port = port.filter(|p| scheme.as_deref().and_then(default_port) != Some(*p));
        Ok(Self::Wildcard {
            scheme,
            domain: domain.to_ascii_lowercase(),
            port,
        })
    }

    /// Whether `origin` (as sent in the `Origin` header) matches.
    pub fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == origin,
            Self::Wildcard {
                scheme,
                domain,
                port,
            } => {
                let Some((origin_scheme, authority)) = origin.split_once("://") else {
                    return false;
                };
                if authority.contains(['/', '?', '#', '@']) {
                    return false;
                }
                if scheme.as_deref().is_some_and(|s| s != origin_scheme) {
                    return false;
                }
                let Some((host, origin_port)) = split_port(authority) else {
                    return false;
                };
                if origin_port != *port {
                    return false;
                }
                host.len() > domain.len() + 1
                    && host.ends_with(domain.as_str())
                    && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
            }
        }
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}

/// Split `host[:port]`. `None` when the port is not a number.
fn split_port(authority: &str) -> Option<(&str, Option<u16>)> {
    match authority.rsplit_once(':') {
        Some((host, port)) => port.parse().ok().map(|p| (host, Some(p))),
        None => Some((authority, None)),
    }
}

/// Ordered, de-duplicated set of allowed origins.
#[derive(Debug, Clone, Default)]
pub struct OriginAllowlist {
    patterns: Vec<OriginPattern>,
}

impl OriginAllowlist {
    /// Build from raw entries. Invalid entries are an error: the config
    /// layer validates them first, so this only fails on programmer error.
    pub fn new<I, S>(entries: I) -> Result<Self, InvalidOrigin>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns = Vec::new();
        for entry in entries {
            let pattern = OriginPattern::parse(entry.as_ref()).map_err(|reason| InvalidOrigin {
                origin: entry.as_ref().to_string(),
                reason,
            })?;
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        Ok(Self { patterns })
    }

    /// Whether the origin matches any entry. An empty list allows nothing.
    pub fn is_allowed(&self, origin: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(origin))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Merge the built-in Discord origins with configured and environment
/// extras, first occurrence wins.
pub fn build_allowed_origins(cors: &CorsConfig, embedding: &EmbeddingConfig) -> Vec<String> {
    let mut origins: Vec<String> = Vec::new();
    let mut push = |origin: String| {
        if !origins.contains(&origin) {
            origins.push(origin);
        }
    };

    if cors.include_defaults {
        DISCORD_ORIGINS.iter().for_each(|o| push(o.to_string()));
        if !embedding.client_id.is_empty() {
            push(format!("https://{}.discordsays.com", embedding.client_id));
        }
    }
    cors.allowed_origins.iter().cloned().for_each(push);

    origins
}

/// State for the CORS middleware.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowlist: OriginAllowlist,
    max_age: HeaderValue,
}

impl OriginPolicy {
    pub fn new(allowlist: OriginAllowlist, max_age_secs: u64) -> Self {
        Self {
            allowlist,
            max_age: HeaderValue::from(max_age_secs),
        }
    }

    pub fn from_config(cors: &CorsConfig, embedding: &EmbeddingConfig) -> Result<Self, InvalidOrigin> {
        let allowlist = OriginAllowlist::new(build_allowed_origins(cors, embedding))?;
        Ok(Self::new(allowlist, cors.max_age_secs))
    }

    pub fn allowlist(&self) -> &OriginAllowlist {
        &self.allowlist
    }

    /// The request origin if it is present and allowed.
    fn allowed_origin(&self, headers: &HeaderMap) -> Result<Option<HeaderValue>, ()> {
        let Some(value) = headers.get(header::ORIGIN) else {
            return Ok(None);
        };
        match value.to_str() {
            Ok(origin) if self.allowlist.is_allowed(origin) => Ok(Some(value.clone())),
            _ => Err(()),
        }
    }
}

fn is_preflight(request: &Request<Body>) -> bool {
    request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

fn apply_cors_headers(headers: &mut HeaderMap, origin: HeaderValue) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    let varies_on_origin = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("origin")));
    if !varies_on_origin {
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }
}

/// CORS middleware.
pub async fn cors_middleware(
    State(policy): State<Arc<OriginPolicy>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let allowed = policy.allowed_origin(request.headers());
    let origin = match allowed {
        Ok(Some(origin)) => origin,
        Ok(None) => return next.run(request).await,
        Err(()) => {
            tracing::debug!(
                origin = ?request.headers().get(header::ORIGIN),
                path = %request.uri().path(),
                "Origin not allowed, omitting CORS headers"
            );
            metrics::record_cors_rejected();
            return next.run(request).await;
        }
    };

    if is_preflight(&request) {
        let allow_headers = request
            .headers()
            .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_ALLOWED_HEADERS));

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        let headers = response.headers_mut();
        apply_cors_headers(headers, origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, policy.max_age.clone());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut(), origin);
    response
}
