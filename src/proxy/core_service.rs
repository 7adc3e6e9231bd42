//! Proxy to the trusted Core service.
//!
//! # Responsibilities
//! - Forward the Core prefix to Core only, carrying the shared secret
//! - Drop any client-supplied copy of the secret header
//! - Gate forwarding on the cached health check and answer from a fallback
//!   while Core is down
//!
//! # Data Flow
//! ```text
//! Request under core prefix
//!     → HealthCache::check() ── unhealthy ──→ fallback
//!     → inject secret → Forwarder
//!     → Ok(response)
//!     → Err(connect) → mark unhealthy → fallback
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Request as HttpRequest, StatusCode},
    middleware::{self, Next},
    response::Response,
    Router,
};
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CoreConfig;
use crate::health::{HealthCache, HttpHealthProbe};
use crate::http::response::json_error;
use crate::observability::metrics;
use crate::proxy::error::FailedRequest;
use crate::proxy::forward::Forwarder;
use crate::routing::{router::parse_target, PathRewrite, ProxyRoute};

pub const CORE_ROUTE_NAME: &str = "core";

#[derive(Debug, Error)]
pub enum CoreProxyError {
    #[error("core shared secret is empty")]
    MissingSecret,

    #[error("invalid core secret header name: {0}")]
    InvalidSecretHeader(String),

    #[error("core shared secret is not a valid header value")]
    InvalidSecret,

    #[error(transparent)]
    Route(#[from] crate::routing::RouteError),

    #[error("invalid core health url: {0}")]
    InvalidHealthUrl(#[from] axum::http::uri::InvalidUri),
}

/// Why the fallback was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The cached health check reports Core down.
    Unhealthy,
    /// Core was believed healthy but forwarding failed.
    UpstreamFailed,
}

type FallbackFn = Arc<dyn Fn(FailedRequest, FallbackReason) -> BoxFuture<'static, Response> + Send + Sync>;

/// Produces the response served in place of Core.
#[derive(Clone)]
pub struct FallbackHandler(FallbackFn);

impl FallbackHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(FailedRequest, FallbackReason) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Self(Arc::new(move |request, reason| Box::pin(f(request, reason))))
    }

    /// 503 `{"error":"Core service unavailable"}` with `Retry-After` set to
    /// the health TTL.
    pub fn unavailable(retry_after: Duration) -> Self {
        let secs = retry_after.as_secs().max(1);
        Self::new(move |_, _| async move {
            let mut response = json_error(StatusCode::SERVICE_UNAVAILABLE, "Core service unavailable");
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
            response
        })
    }

    pub async fn call(&self, request: FailedRequest, reason: FallbackReason) -> Response {
        (self.0)(request, reason).await
    }
}

impl fmt::Debug for FallbackHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FallbackHandler(..)")
    }
}

/// Health gate and fallback used together.
#[derive(Clone, Debug)]
struct Guard {
    health: Arc<HealthCache>,
    fallback: FallbackHandler,
}

#[derive(Clone, Debug)]
pub struct CoreProxy {
    route: Arc<ProxyRoute>,
    forwarder: Forwarder,
    secret_header: HeaderName,
    secret: HeaderValue,
    guard: Option<Guard>,
}

impl CoreProxy {
    pub fn route(&self) -> &ProxyRoute {
        &self.route
    }

    pub fn health(&self) -> Option<&Arc<HealthCache>> {
        self.guard.as_ref().map(|g| &g.health)
    }

    /// Gate on `health` and answer from `fallback` while Core is down.
    pub fn with_fallback(mut self, health: Arc<HealthCache>, fallback: FallbackHandler) -> Self {
        self.guard = Some(Guard { health, fallback });
        self
    }

    /// Replace any inbound secret header with the configured secret.
    fn authorize(&self, request: &mut HttpRequest<Body>) {
        let headers = request.headers_mut();
        headers.remove(&self.secret_header);
        headers.insert(self.secret_header.clone(), self.secret.clone());
    }

    pub async fn handle(&self, mut request: HttpRequest<Body>) -> Response {
        let start = Instant::now();
        let method = request.method().to_string();
        let request_id = crate::http::request::request_id(&request);
        let failed = FailedRequest::capture(&self.route.name, &request);

        if let Some(guard) = &self.guard {
            if !guard.health.check().await {
                tracing::debug!(request_id = %request_id, "Core unhealthy, serving fallback");
                let response = guard.fallback.call(failed, FallbackReason::Unhealthy).await;
                metrics::record_request(&self.route.name, &method, response.status().as_u16(), start);
                return response;
            }
        }

        self.authorize(&mut request);
        let response = match self.forwarder.dispatch(&self.route, request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(
                    request_id = %request_id,
                    route = %self.route.name,
                    error = %error,
                    "Core request failed"
                );
                metrics::record_upstream_error(&self.route.name, error.kind());
                match &self.guard {
                    Some(guard) => {
                        if error.is_connect() {
                            guard.health.mark_unhealthy().await;
                        }
                        guard.fallback.call(failed, FallbackReason::UpstreamFailed).await
                    }
                    None => self.route.on_error.respond(&error, &failed),
                }
            }
        };

        metrics::record_request(&self.route.name, &method, response.status().as_u16(), start);
        response
    }

    /// Wrap `app` so the Core prefix is proxied and the rest falls through.
    pub fn mount(self, app: Router) -> Router {
        app.layer(middleware::from_fn_with_state(self, core_proxy_middleware))
    }
}

pub async fn core_proxy_middleware(
    State(core): State<CoreProxy>,
    request: Request,
    next: Next,
) -> Response {
    if core.route.matcher.matches_path(request.uri().path()) {
        core.handle(request).await
    } else {
        next.run(request).await
    }
}

/// Proxy to Core with secret injection and no health gate. Failures use the
/// generic error response.
pub fn create_core_proxy(config: &CoreConfig, forwarder: Forwarder) -> Result<CoreProxy, CoreProxyError> {
    if config.shared_secret.is_empty() {
        return Err(CoreProxyError::MissingSecret);
    }
    let secret_header = HeaderName::try_from(config.secret_header.as_str())
        .map_err(|_| CoreProxyError::InvalidSecretHeader(config.secret_header.clone()))?;
    let mut secret = HeaderValue::from_str(&config.shared_secret).map_err(|_| CoreProxyError::InvalidSecret)?;
    secret.set_sensitive(true);

    let target = parse_target(CORE_ROUTE_NAME, &config.base_url)?;
    let rewrite = PathRewrite::compile(&config.rewrite).map_err(|source| crate::routing::RouteError::InvalidRewrite {
        route: CORE_ROUTE_NAME.to_string(),
        source,
    })?;
    let route = ProxyRoute::new(&config.path_prefix, target)
        .with_name(CORE_ROUTE_NAME)
        .with_rewrite(rewrite)
        .with_websocket(true)
        .with_timeout(Duration::from_secs(config.timeout_secs));

    Ok(CoreProxy {
        route: Arc::new(route),
        forwarder,
        secret_header,
        secret,
        guard: None,
    })
}

/// [`create_core_proxy`] gated by a cached health probe of
/// `{base_url}{health_path}`, answering from `fallback` while Core is down.
pub fn create_core_proxy_with_fallback(
    config: &CoreConfig,
    forwarder: Forwarder,
    fallback: FallbackHandler,
) -> Result<CoreProxy, CoreProxyError> {
    let probe = HttpHealthProbe::new(
        forwarder.client().clone(),
        &config.base_url,
        &config.health_path,
        Duration::from_millis(config.health_timeout_ms),
    )?;
    let proxy = create_core_proxy(config, forwarder)?;
    let health = Arc::new(HealthCache::new(
        Arc::new(probe),
        Duration::from_secs(config.health_ttl_secs),
    ));
    tracing::info!(
        prefix = %proxy.route.prefix(),
        ttl_secs = config.health_ttl_secs,
        "Core proxy mounted with health-gated fallback"
    );
    Ok(proxy.with_fallback(health, fallback))
}

/// The default fallback for `config`.
pub fn default_fallback(config: &CoreConfig) -> FallbackHandler {
    FallbackHandler::unavailable(Duration::from_secs(config.health_ttl_secs))
}
