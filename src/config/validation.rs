//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0)
//! - Detect conflicting routes
//! - Reject missing secrets before any traffic is served
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::{GatewayConfig, KeyStrategyName, RewriteRuleConfig};
use crate::routing::rewrite::PathRewrite;
use crate::security::headers::CspDirective;
use crate::security::origin::{OriginError, OriginPattern};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("core.shared_secret must be set")]
    MissingCoreSecret,

    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),

    #[error("invalid origin '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: OriginError },

    #[error("unknown CSP directive '{0}'")]
    UnknownCspDirective(String),

    #[error("route '{route}': path prefix '{prefix}' must start with '/'")]
    InvalidPrefix { route: String, prefix: String },

    #[error("path prefix '{0}' is claimed by more than one route")]
    DuplicatePrefix(String),

    #[error("route '{route}': invalid target '{target}': {reason}")]
    InvalidTarget {
        route: String,
        target: String,
        reason: String,
    },

    #[error("route '{route}': invalid rewrite pattern '{pattern}'")]
    InvalidRewrite { route: String, pattern: String },

    #[error("{field}: '{name}' is not a valid header name")]
    InvalidHeaderName { field: String, name: String },

    #[error("rate limit rule '{0}' needs a preset or both window_secs and max_requests")]
    IncompleteRateLimitRule(String),

    #[error("rate limit rule name '{0}' is used more than once")]
    DuplicateRateLimitRule(String),

    #[error("rate limit path prefix '{0}' is claimed by more than one rule")]
    DuplicateRateLimitPrefix(String),

    #[error("invalid trusted proxy address '{0}'")]
    InvalidTrustedProxy(String),

    #[error("{field} must be greater than zero")]
    ZeroValue { field: String },
}

/// Validate the whole configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config
        .listener
        .bind_address
        .parse::<std::net::SocketAddr>()
        .is_err()
    {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    for origin in config
        .cors
        .allowed_origins
        .iter()
        .chain(config.embedding.additional_frame_ancestors.iter())
    {
        if let Err(reason) = OriginPattern::parse(origin) {
            errors.push(ValidationError::InvalidOrigin {
                origin: origin.clone(),
                reason,
            });
        }
    }

    for name in config.csp.overrides.keys() {
        if CspDirective::from_name(name).is_none() {
            errors.push(ValidationError::UnknownCspDirective(name.clone()));
        }
    }

    validate_rate_limits(config, &mut errors);
    validate_routes(config, &mut errors);

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroValue {
            field: "timeouts.request_secs".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_rate_limits(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    if !config.rate_limit.enabled {
        return;
    }
    if config.rate_limit.sweep_interval_secs == 0 {
        errors.push(ValidationError::ZeroValue {
            field: "rate_limit.sweep_interval_secs".to_string(),
        });
    }

    for proxy in &config.rate_limit.trusted_proxies {
        if proxy.trim().parse::<std::net::IpAddr>().is_err() {
            errors.push(ValidationError::InvalidTrustedProxy(proxy.clone()));
        }
    }

    let mut names = HashSet::new();
    let mut prefixes = HashSet::new();
    for rule in &config.rate_limit.rules {
        if !names.insert(rule.name.as_str()) {
            errors.push(ValidationError::DuplicateRateLimitRule(rule.name.clone()));
        }
        let prefix = normalize_prefix(&rule.path_prefix);
        if !prefixes.insert(prefix.clone()) {
            errors.push(ValidationError::DuplicateRateLimitPrefix(prefix));
        }

        let explicit = rule.window_secs.is_some() && rule.max_requests.is_some();
        if rule.preset.is_none() && !explicit {
            errors.push(ValidationError::IncompleteRateLimitRule(rule.name.clone()));
        }
        if rule.window_secs == Some(0) {
            errors.push(ValidationError::ZeroValue {
                field: format!("rate_limit.rules.{}.window_secs", rule.name),
            });
        }
        if rule.max_requests == Some(0) {
            errors.push(ValidationError::ZeroValue {
                field: format!("rate_limit.rules.{}.max_requests", rule.name),
            });
        }
        if !rule.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPrefix {
                route: rule.name.clone(),
                prefix: rule.path_prefix.clone(),
            });
        }
        match rule.key {
            KeyStrategyName::Ip => {}
            KeyStrategyName::User => check_header_name(
                &format!("rate_limit.rules.{}.user_header", rule.name),
                &rule.user_header,
                errors,
            ),
            KeyStrategyName::Session => check_header_name(
                &format!("rate_limit.rules.{}.session_header", rule.name),
                &rule.session_header,
                errors,
            ),
        }
    }
}

fn check_header_name(field: &str, name: &str, errors: &mut Vec<ValidationError>) {
    if axum::http::HeaderName::try_from(name).is_err() {
        errors.push(ValidationError::InvalidHeaderName {
            field: field.to_string(),
            name: name.to_string(),
        });
    }
}

fn validate_routes(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();

    for route in &config.proxy.routes {
        let name = route.name.clone().unwrap_or_else(|| route.path_prefix.clone());
        check_route(
            &name,
            &route.path_prefix,
            &route.target,
            &route.rewrite,
            &mut seen,
            errors,
        );
        if route.timeout_secs == Some(0) {
            errors.push(ValidationError::ZeroValue {
                field: format!("proxy.routes.{name}.timeout_secs"),
            });
        }
    }

    if config.proxy.defaults.timeout_secs == 0 {
        errors.push(ValidationError::ZeroValue {
            field: "proxy.defaults.timeout_secs".to_string(),
        });
    }

    if let Some(core) = &config.core {
        if core.shared_secret.trim().is_empty() {
            errors.push(ValidationError::MissingCoreSecret);
        }
        check_route(
            "core",
            &core.path_prefix,
            &core.base_url,
            &core.rewrite,
            &mut seen,
            errors,
        );
        check_header_name("core.secret_header", &core.secret_header, errors);
        for (field, value) in [
            ("core.health_ttl_secs", core.health_ttl_secs),
            ("core.health_timeout_ms", core.health_timeout_ms),
            ("core.timeout_secs", core.timeout_secs),
        ] {
            if value == 0 {
                errors.push(ValidationError::ZeroValue {
                    field: field.to_string(),
                });
            }
        }
    }
}

fn check_route(
    name: &str,
    prefix: &str,
    target: &str,
    rewrite: &[RewriteRuleConfig],
    seen: &mut HashSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    if !prefix.starts_with('/') {
        errors.push(ValidationError::InvalidPrefix {
            route: name.to_string(),
            prefix: prefix.to_string(),
        });
    }

    let normalized = normalize_prefix(prefix);
    if !seen.insert(normalized.clone()) {
        errors.push(ValidationError::DuplicatePrefix(normalized));
    }

    match Url::parse(target) {
        Ok(url) if url.scheme() != "http" => errors.push(ValidationError::InvalidTarget {
            route: name.to_string(),
            target: target.to_string(),
            reason: "only http:// targets are supported".to_string(),
        }),
        Ok(url) if url.host_str().is_none() => errors.push(ValidationError::InvalidTarget {
            route: name.to_string(),
            target: target.to_string(),
            reason: "missing host".to_string(),
        }),
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::InvalidTarget {
            route: name.to_string(),
            target: target.to_string(),
            reason: e.to_string(),
        }),
    }

    for rule in rewrite {
        if PathRewrite::compile(std::slice::from_ref(rule)).is_err() {
            errors.push(ValidationError::InvalidRewrite {
                route: name.to_string(),
                pattern: rule.pattern.clone(),
            });
        }
    }
}

/// Prefixes differing only by a trailing slash claim the same paths.
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
