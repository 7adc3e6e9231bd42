//! Rate limit key generation.
//!
//! # Design Decisions
//! - The socket peer is the only identity a client cannot forge. Forwarding
//!   and identity headers count only when that peer is a trusted proxy
//! - A strategy that cannot produce a key degrades to [`GLOBAL_KEY`], so a
//!   request without identity shares one bucket instead of escaping limits

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, HeaderName, Request},
};
use thiserror::Error;

use crate::config::{KeyStrategyName, RateLimitRuleConfig};
use crate::security::rate_limit::RateLimitConfigError;

/// Catch-all key used when a strategy fails.
pub const GLOBAL_KEY: &str = "global";

const X_FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("no client address available")]
    NoClientAddress,

    #[error("header '{0}' is not valid UTF-8")]
    InvalidHeader(String),

    #[error("{0}")]
    Custom(String),
}

/// Peers allowed to speak for the client through `X-Forwarded-For` and
/// the user/session headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedProxies(Vec<IpAddr>);

impl TrustedProxies {
    pub fn new(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        Self(addrs.into_iter().map(|ip| ip.to_canonical()).collect())
    }

    pub fn parse<I, S>(entries: I) -> Result<Self, RateLimitConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addrs = entries
            .into_iter()
            .map(|entry| {
                let entry = entry.as_ref().trim();
                entry
                    .parse::<IpAddr>()
                    .map_err(|_| RateLimitConfigError::InvalidTrustedProxy(entry.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(addrs))
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.contains(&ip.to_canonical())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub type CustomKeyFn = Arc<dyn Fn(&Request<Body>) -> Result<String, KeyError> + Send + Sync>;

/// How requests are grouped into rate limit keys.
#[derive(Clone)]
pub enum KeyStrategy {
    /// Client IP address.
    Ip,
    /// User ID header set by a trusted hop, falling back to IP.
    User { header: HeaderName },
    /// Session ID header set by a trusted hop, falling back to IP.
    Session { header: HeaderName },
    Custom(CustomKeyFn),
}

impl fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip => f.write_str("Ip"),
            Self::User { header } => f.debug_struct("User").field("header", header).finish(),
            Self::Session { header } => f.debug_struct("Session").field("header", header).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Default for KeyStrategy {
    fn default() -> Self {
        Self::Ip
    }
}

impl KeyStrategy {
    pub fn user() -> Self {
        Self::User {
            header: HeaderName::from_static("x-user-id"),
        }
    }

    pub fn session() -> Self {
        Self::Session {
            header: HeaderName::from_static("x-session-id"),
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Request<Body>) -> Result<String, KeyError> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn from_config(rule: &RateLimitRuleConfig) -> Result<Self, RateLimitConfigError> {
        let header = |raw: &str| {
            HeaderName::try_from(raw).map_err(|_| RateLimitConfigError::InvalidHeaderName {
                rule: rule.name.clone(),
                name: raw.to_string(),
            })
        };
        Ok(match rule.key {
            KeyStrategyName::Ip => Self::Ip,
            KeyStrategyName::User => Self::User {
                header: header(&rule.user_header)?,
            },
            KeyStrategyName::Session => Self::Session {
                header: header(&rule.session_header)?,
            },
        })
    }

    /// Derive the key, surfacing failures.
    pub fn generate(
        &self,
        request: &Request<Body>,
        trusted: &TrustedProxies,
    ) -> Result<String, KeyError> {
        match self {
            Self::Ip => ip_key(request, trusted),
            Self::User { header } => identity_key("user", header, request, trusted),
            Self::Session { header } => identity_key("session", header, request, trusted),
            Self::Custom(f) => f(request),
        }
    }

    /// Derive the key, degrading to [`GLOBAL_KEY`] on failure.
    pub fn key_for(&self, request: &Request<Body>, trusted: &TrustedProxies) -> String {
        match self.generate(request, trusted) {
            Ok(key) if !key.is_empty() => key,
            Ok(_) => GLOBAL_KEY.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, strategy = ?self, "Rate limit key unavailable, using global key");
                GLOBAL_KEY.to_string()
            }
        }
    }
}

fn header_key(
    kind: &str,
    header: &HeaderName,
    headers: &HeaderMap,
) -> Option<Result<String, KeyError>> {
    let value = headers.get(header)?;
    Some(match value.to_str() {
        Ok(v) if !v.trim().is_empty() => Ok(format!("{kind}:{}", v.trim())),
        Ok(_) => return None,
        Err(_) => Err(KeyError::InvalidHeader(header.to_string())),
    })
}

/// `{kind}:{value}` when a trusted hop supplied the header, else the IP key.
fn identity_key(
    kind: &str,
    header: &HeaderName,
    request: &Request<Body>,
    trusted: &TrustedProxies,
) -> Result<String, KeyError> {
    let from_trusted_hop = peer_ip(request).is_some_and(|peer| trusted.contains(peer));
    if from_trusted_hop {
        if let Some(key) = header_key(kind, header, request.headers()) {
            return key;
        }
    }
    ip_key(request, trusted)
}

fn ip_key(request: &Request<Body>, trusted: &TrustedProxies) -> Result<String, KeyError> {
    client_ip(request, trusted)
        .map(|ip| format!("ip:{ip}"))
        .ok_or(KeyError::NoClientAddress)
}

/// Keys by client IP with no trusted proxies: `ip:<peer>`.
pub fn default_key_generator(request: &Request<Body>) -> Result<String, KeyError> {
    ip_key(request, &TrustedProxies::default())
}

fn peer_ip(request: &Request<Body>) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_canonical())
}

/// The client address. For an untrusted peer this is the peer itself.
/// Behind trusted proxies it is the right-most `X-Forwarded-For` entry that
/// is not itself a trusted proxy; the walk stops at the first malformed
/// entry and falls back to the peer.
pub fn client_ip(request: &Request<Body>, trusted: &TrustedProxies) -> Option<IpAddr> {
    let peer = peer_ip(request)?;
    if !trusted.contains(peer) {
        return Some(peer);
    }

    let chain = request
        .headers()
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(",");
    for entry in chain.rsplit(',') {
        match entry.trim().parse::<IpAddr>() {
            Ok(ip) if trusted.contains(ip) => continue,
            Ok(ip) => return Some(ip.to_canonical()),
            Err(_) => break,
        }
    }
    Some(peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDGE: &str = "10.0.0.1";

    fn trusted() -> TrustedProxies {
        TrustedProxies::parse([EDGE]).unwrap()
    }

    fn request(headers: &[(&str, &str)], peer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request
    }

    #[test]
    fn untrusted_peer_cannot_choose_its_ip_key() {
        let req = request(&[("x-forwarded-for", "203.0.113.9")], Some("198.51.100.1:5555"));
        assert_eq!(KeyStrategy::Ip.key_for(&req, &TrustedProxies::default()), "ip:198.51.100.1");
        assert_eq!(KeyStrategy::Ip.key_for(&req, &trusted()), "ip:198.51.100.1");
        assert_eq!(default_key_generator(&req), Ok("ip:198.51.100.1".to_string()));
    }

    #[test]
    fn trusted_peer_forwards_the_client_address() {
        let req = request(
            &[("x-forwarded-for", "1.1.1.1, 203.0.113.9")],
            Some("10.0.0.1:5555"),
        );
        assert_eq!(KeyStrategy::Ip.key_for(&req, &trusted()), "ip:203.0.113.9");

        // Trusted hops inside the chain are skipped.
        let chained = TrustedProxies::parse([EDGE, "10.0.0.2"]).unwrap();
        let req = request(
            &[("x-forwarded-for", "203.0.113.9, 10.0.0.2")],
            Some("10.0.0.1:5555"),
        );
        assert_eq!(KeyStrategy::Ip.key_for(&req, &chained), "ip:203.0.113.9");

        // A malformed entry stops the walk at the peer.
        let req = request(&[("x-forwarded-for", "203.0.113.9, junk")], Some("10.0.0.1:5555"));
        assert_eq!(KeyStrategy::Ip.key_for(&req, &trusted()), "ip:10.0.0.1");

        // Without the header the proxy itself is the client.
        let req = request(&[], Some("10.0.0.1:5555"));
        assert_eq!(KeyStrategy::Ip.key_for(&req, &trusted()), "ip:10.0.0.1");
    }

    #[test]
    fn ipv4_mapped_peers_match_plain_entries() {
        let req = request(&[("x-forwarded-for", "203.0.113.9")], Some("[::ffff:10.0.0.1]:5555"));
        assert_eq!(KeyStrategy::Ip.key_for(&req, &trusted()), "ip:203.0.113.9");
    }

    #[test]
    fn identity_headers_need_a_trusted_hop() {
        let spoofed = request(&[("x-user-id", "u-42")], Some("198.51.100.1:1"));
        assert_eq!(KeyStrategy::user().key_for(&spoofed, &trusted()), "ip:198.51.100.1");

        let spoofed = request(&[("x-session-id", "abc")], Some("198.51.100.1:1"));
        assert_eq!(KeyStrategy::session().key_for(&spoofed, &trusted()), "ip:198.51.100.1");

        let vouched = request(
            &[("x-user-id", "u-42"), ("x-forwarded-for", "203.0.113.9")],
            Some("10.0.0.1:1"),
        );
        assert_eq!(KeyStrategy::user().key_for(&vouched, &trusted()), "user:u-42");

        let anonymous = request(&[("x-forwarded-for", "203.0.113.9")], Some("10.0.0.1:1"));
        assert_eq!(KeyStrategy::user().key_for(&anonymous, &trusted()), "ip:203.0.113.9");
    }

    #[test]
    fn failures_degrade_to_global_key() {
        let none = TrustedProxies::default();
        let no_identity = request(&[("x-forwarded-for", "203.0.113.9")], None);
        assert_eq!(
            KeyStrategy::Ip.generate(&no_identity, &none),
            Err(KeyError::NoClientAddress)
        );
        assert_eq!(KeyStrategy::Ip.key_for(&no_identity, &none), GLOBAL_KEY);

        let failing = KeyStrategy::custom(|_| Err(KeyError::Custom("boom".into())));
        assert_eq!(failing.key_for(&no_identity, &none), GLOBAL_KEY);

        let empty = KeyStrategy::custom(|_| Ok(String::new()));
        assert_eq!(empty.key_for(&no_identity, &none), GLOBAL_KEY);
    }

    #[test]
    fn trusted_proxy_entries_must_be_addresses() {
        assert_eq!(
            TrustedProxies::parse(["10.0.0.1", "lb.internal"]),
            Err(RateLimitConfigError::InvalidTrustedProxy("lb.internal".to_string()))
        );
        assert!(TrustedProxies::parse(Vec::<String>::new()).unwrap().is_empty());
    }
}
