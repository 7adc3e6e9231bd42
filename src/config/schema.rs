//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Embedding host settings (client ID, frame ancestors, production flag).
    pub embedding: EmbeddingConfig,

    /// Cross-origin policy.
    pub cors: CorsConfig,

    /// Content-Security-Policy overrides.
    pub csp: CspConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Activity backend routes.
    pub proxy: ProxyConfig,

    /// Trusted Core service. Absent means no Core routes are mounted.
    pub core: Option<CoreConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Settings describing the host that embeds the application in an iframe.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Discord application client ID. Used to derive the
    /// `{client_id}.discordsays.com` proxy origin.
    pub client_id: String,

    /// Extra origins allowed to frame the application.
    pub additional_frame_ancestors: Vec<String>,

    /// Production mode enables HSTS.
    pub production: bool,
}

/// Cross-origin resource sharing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Extra allowed origins (exact or `*.domain.tld` wildcard).
    pub allowed_origins: Vec<String>,

    /// Include the built-in Discord origins.
    pub include_defaults: bool,

    /// Preflight cache lifetime in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            include_defaults: true,
            max_age_secs: 600,
        }
    }
}

/// Content-Security-Policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CspConfig {
    /// Directive name → source list. Each entry replaces the default
    /// directive entirely.
    pub overrides: BTreeMap<String, Vec<String>>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// How often expired entries are swept from the store.
    pub sweep_interval_secs: u64,

    /// Peer addresses (load balancers, the Discord proxy edge) whose
    /// `X-Forwarded-For` and user/session headers are believed. Headers
    /// from any other peer are ignored and the socket address is the key.
    pub trusted_proxies: Vec<String>,

    /// Route classes, matched by longest path prefix.
    pub rules: Vec<RateLimitRuleConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 60,
            trusted_proxies: Vec::new(),
            rules: vec![RateLimitRuleConfig::default()],
        }
    }
}

/// One rate-limited route class.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitRuleConfig {
    /// Class identifier for logging/metrics and key namespacing.
    pub name: String,

    /// Path prefix this class applies to.
    pub path_prefix: String,

    /// Named preset. Explicit `window_secs`/`max_requests` override it.
    #[serde(default)]
    pub preset: Option<RateLimitPresetName>,

    #[serde(default)]
    pub window_secs: Option<u64>,

    #[serde(default)]
    pub max_requests: Option<u64>,

    /// How requests are grouped into keys.
    #[serde(default)]
    pub key: KeyStrategyName,

    #[serde(default = "default_user_header")]
    pub user_header: String,

    #[serde(default = "default_session_header")]
    pub session_header: String,
}

impl Default for RateLimitRuleConfig {
    /// Standard preset on every path, keyed by client IP.
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            path_prefix: "/".to_string(),
            preset: Some(RateLimitPresetName::Standard),
            window_secs: None,
            max_requests: None,
            key: KeyStrategyName::Ip,
            user_header: default_user_header(),
            session_header: default_session_header(),
        }
    }
}

fn default_user_header() -> String {
    "x-user-id".to_string()
}

fn default_session_header() -> String {
    "x-session-id".to_string()
}

/// Preset names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPresetName {
    Ai,
    Standard,
    StaticAssets,
    Health,
    Auth,
}

/// Key strategy names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategyName {
    #[default]
    Ip,
    User,
    Session,
}

/// Activity backend routing.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Options shared by every route unless the route overrides them.
    pub defaults: RouteDefaultsConfig,

    /// Prefix → target routes.
    pub routes: Vec<ProxyRouteConfig>,
}

/// Shared route options.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteDefaultsConfig {
    /// Forward WebSocket upgrades.
    pub websocket: bool,

    /// Upstream response timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RouteDefaultsConfig {
    fn default() -> Self {
        Self {
            websocket: false,
            timeout_secs: 30,
        }
    }
}

/// A single proxy route.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyRouteConfig {
    /// Route identifier for logging/metrics. Defaults to the prefix.
    #[serde(default)]
    pub name: Option<String>,

    /// Path prefix to match.
    pub path_prefix: String,

    /// Target base URL (e.g., "http://127.0.0.1:3001").
    pub target: String,

    #[serde(default)]
    pub websocket: Option<bool>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Ordered rewrite rules applied to the request path.
    #[serde(default)]
    pub rewrite: Vec<RewriteRuleConfig>,
}

/// Regex path rewrite rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteRuleConfig {
    pub pattern: String,
    pub replacement: String,
}

/// Trusted Core service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Base URL of the Core service.
    pub base_url: String,

    /// Shared secret injected into every forwarded request. Required.
    pub shared_secret: String,

    /// Header carrying the shared secret.
    pub secret_header: String,

    /// Path prefix routed to Core.
    pub path_prefix: String,

    /// Path probed by the health check.
    pub health_path: String,

    /// Health probe timeout in milliseconds.
    pub health_timeout_ms: u64,

    /// How long a health result is reused.
    pub health_ttl_secs: u64,

    /// Upstream response timeout in seconds.
    pub timeout_secs: u64,

    /// Ordered rewrite rules applied to the request path.
    pub rewrite: Vec<RewriteRuleConfig>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4000".to_string(),
            shared_secret: String::new(),
            secret_header: "x-core-secret".to_string(),
            path_prefix: "/core".to_string(),
            health_path: "/health".to_string(),
            health_timeout_ms: 2000,
            health_ttl_secs: 30,
            timeout_secs: 30,
            rewrite: Vec::new(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert!(config.core.is_none());
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.rules.len(), 1);
    }

    #[test]
    fn parses_full_config() {
        let raw = r#"
            [embedding]
            client_id = "1234"
            production = true

            [cors]
            allowed_origins = ["https://approved.example"]

            [csp.overrides]
            "script-src" = ["'self'", "https://cdn.example"]

            [[rate_limit.rules]]
            name = "ai"
            path_prefix = "/api/ai"
            preset = "ai"
            key = "user"

            [[proxy.routes]]
            path_prefix = "/api"
            target = "http://127.0.0.1:3001"
            websocket = true
            rewrite = [{ pattern = "^/api/old", replacement = "/api/new" }]

            [core]
            base_url = "http://core.internal:4000"
            shared_secret = "s3cret"
        "#;

        let config: GatewayConfig = toml::from_str(raw).unwrap();
        assert!(config.embedding.production);
        assert_eq!(config.rate_limit.rules[0].key, KeyStrategyName::User);
        assert_eq!(config.rate_limit.rules[0].preset, Some(RateLimitPresetName::Ai));
        assert_eq!(config.proxy.routes[0].websocket, Some(true));
        assert_eq!(config.proxy.routes[0].rewrite.len(), 1);

        let core = config.core.unwrap();
        assert_eq!(core.secret_header, "x-core-secret");
        assert_eq!(core.health_ttl_secs, 30);
    }
}
