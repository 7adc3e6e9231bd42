//! Startup errors.
//!
//! Everything here is fatal: the gateway refuses to serve rather than run
//! with a partial pipeline.

use thiserror::Error;

use crate::config::ConfigError;
use crate::proxy::CoreProxyError;
use crate::routing::RouteError;
use crate::security::{InvalidOrigin, RateLimitConfigError};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid origin allowlist: {0}")]
    Origin(#[from] InvalidOrigin),

    #[error("invalid security header value: {0}")]
    SecurityHeaders(#[from] axum::http::header::InvalidHeaderValue),

    #[error("invalid rate limit policy: {0}")]
    RateLimit(#[from] RateLimitConfigError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Core(#[from] CoreProxyError),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to initialize logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("invalid address '{0}'")]
    Address(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
