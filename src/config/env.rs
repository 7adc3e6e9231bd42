//! Environment variable overrides.
//!
//! Applied after the config file is parsed and before validation, so a
//! secret supplied only through the environment still satisfies the
//! required-field checks.

use std::collections::HashMap;

use crate::config::schema::{CoreConfig, GatewayConfig};

pub const BIND_ADDRESS: &str = "GATEWAY_BIND_ADDRESS";
pub const DISCORD_CLIENT_ID: &str = "DISCORD_CLIENT_ID";
/// Comma-separated origins appended to `cors.allowed_origins`.
pub const ALLOWED_ORIGINS: &str = "GATEWAY_ALLOWED_ORIGINS";
/// Comma-separated origins appended to `embedding.additional_frame_ancestors`.
pub const FRAME_ANCESTORS: &str = "GATEWAY_FRAME_ANCESTORS";
/// Comma-separated peer addresses allowed to set forwarding and identity
/// headers.
pub const TRUSTED_PROXIES: &str = "GATEWAY_TRUSTED_PROXIES";
/// `production` enables HSTS.
pub const ENVIRONMENT: &str = "GATEWAY_ENV";
pub const CORE_SERVICE_URL: &str = "CORE_SERVICE_URL";
pub const CORE_SHARED_SECRET: &str = "CORE_SHARED_SECRET";

/// Get all environment variable names for documentation/validation.
pub fn all_env_vars() -> &'static [&'static str] {
    &[
        BIND_ADDRESS,
        DISCORD_CLIENT_ID,
        ALLOWED_ORIGINS,
        TRUSTED_PROXIES,
        FRAME_ANCESTORS,
        ENVIRONMENT,
        CORE_SERVICE_URL,
        CORE_SHARED_SECRET,
    ]
}

/// Source of environment values. Abstracted so tests never touch the
/// process environment.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads from `std::env`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(env: &impl EnvSource, key: &str) -> Option<String> {
    env.get(key).filter(|v| !v.trim().is_empty())
}

fn extend_unique(target: &mut Vec<String>, extras: Vec<String>) {
    for item in extras {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

/// Merge environment values into `config`.
pub fn apply_env_overrides(config: &mut GatewayConfig, env: &impl EnvSource) {
    if let Some(addr) = non_empty(env, BIND_ADDRESS) {
        config.listener.bind_address = addr;
    }
    if let Some(id) = non_empty(env, DISCORD_CLIENT_ID) {
        config.embedding.client_id = id;
    }
    if let Some(raw) = env.get(ALLOWED_ORIGINS) {
        extend_unique(&mut config.cors.allowed_origins, split_list(&raw));
    }
    if let Some(raw) = env.get(FRAME_ANCESTORS) {
        extend_unique(
            &mut config.embedding.additional_frame_ancestors,
            split_list(&raw),
        );
    }
    if let Some(raw) = env.get(TRUSTED_PROXIES) {
        extend_unique(&mut config.rate_limit.trusted_proxies, split_list(&raw));
    }
    if let Some(mode) = env.get(ENVIRONMENT) {
        config.embedding.production = mode.eq_ignore_ascii_case("production");
    }

    let url = non_empty(env, CORE_SERVICE_URL);
    let secret = non_empty(env, CORE_SHARED_SECRET);
    if url.is_some() || secret.is_some() {
        let core = config.core.get_or_insert_with(CoreConfig::default);
        if let Some(url) = url {
            core.base_url = url;
        }
        if let Some(secret) = secret {
            core.shared_secret = secret;
        }
    }
}
