//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Assemble the request pipeline from config
//! - Serve local routes (`/healthz`) and the 404 fallback
//! - Run the rate limit sweeper alongside the server
//! - Bind to a listener and drain on shutdown
//!
//! # Pipeline (outermost first)
//! ```text
//! request id → trace → timeout → security headers → CORS
//!     → rate limit → core proxy → activity proxies → /healthz | 404
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::Response,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::health::HealthCache;
use crate::http::request::{request_id, UuidRequestId, X_REQUEST_ID};
use crate::http::response::json_error;
use crate::lifecycle::Shutdown;
use crate::proxy::{create_core_proxy_with_fallback, default_fallback, setup_multi_proxy, Forwarder};
use crate::routing::MultiProxyConfig;
use crate::security::{
    cors_middleware, rate_limit_policy_middleware, security_headers_middleware, MemoryStore,
    OriginPolicy, RateLimitPolicy, RateLimitStore, SecurityHeaders,
};

/// The assembled gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    store: Arc<MemoryStore>,
    core_health: Option<Arc<HealthCache>>,
}

impl GatewayServer {
    /// Build every component from a validated config.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let store = Arc::new(MemoryStore::new());
        let forwarder = Forwarder::new();

        let core = config
            .core
            .as_ref()
            .map(|core| create_core_proxy_with_fallback(core, forwarder.clone(), default_fallback(core)))
            .transpose()?;
        let core_health = core.as_ref().and_then(|c| c.health().cloned());

        let app = Router::new()
            .route("/healthz", get(healthz))
            .with_state(core_health.clone())
            .fallback(not_found);

        let app = setup_multi_proxy(app, MultiProxyConfig::from_config(&config.proxy)?, forwarder)?;
        let app = match core {
            Some(core) => core.mount(app),
            None => app,
        };

        let app = if config.rate_limit.enabled {
            let shared: Arc<dyn RateLimitStore> = store.clone();
            let policy = RateLimitPolicy::from_config(&config.rate_limit, shared)?;
            app.layer(middleware::from_fn_with_state(Arc::new(policy), rate_limit_policy_middleware))
        } else {
            tracing::warn!("Rate limiting disabled");
            app
        };

        let origins = OriginPolicy::from_config(&config.cors, &config.embedding)?;
        tracing::info!(origins = origins.allowlist().len(), "CORS allowlist loaded");
        let security = SecurityHeaders::from_config(&config)?;

        let router = Self::build_router(&config, app, origins, security);
        Ok(Self {
            router,
            config,
            store,
            core_health,
        })
    }

    /// Outer layers shared by every request.
    #[allow(deprecated)]
    fn build_router(
        config: &GatewayConfig,
        app: Router,
        origins: OriginPolicy,
        security: SecurityHeaders,
    ) -> Router {
        app.layer(middleware::from_fn_with_state(Arc::new(origins), cors_middleware))
            .layer(middleware::from_fn_with_state(Arc::new(security), security_headers_middleware))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
                    .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        tracing::info_span!(
                            "request",
                            method = %request.method(),
                            path = %request.uri().path(),
                            request_id = %request_id(request),
                        )
                    }))
                    .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// The assembled router, for driving the gateway without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn core_health(&self) -> Option<&Arc<HealthCache>> {
        self.core_health.as_ref()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires, then drain.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Gateway listening");

        if self.config.rate_limit.enabled {
            let interval = Duration::from_secs(self.config.rate_limit.sweep_interval_secs);
            let stop = shutdown.subscribe();
            tokio::spawn(sweep_expired(self.store.clone(), interval, stop));
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.signalled())
            .await?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Periodically drop expired rate limit windows.
///
/// `stop` is subscribed by the caller before spawning so a shutdown that
/// fires before the task first runs is still observed.
async fn sweep_expired(store: Arc<MemoryStore>, interval: Duration, mut stop: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.sweep(tokio::time::Instant::now()).await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, remaining = store.len(), "Swept expired rate limit entries"),
                    Err(e) => tracing::error!(error = %e, "Rate limit sweep failed"),
                }
            }
            _ = stop.recv() => {
                tracing::debug!("Rate limit sweeper stopping");
                break;
            }
        }
    }
}

async fn healthz(State(core): State<Option<Arc<HealthCache>>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "core_healthy": core.and_then(|health| health.cached()),
    }))
}

async fn not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "not found")
}
