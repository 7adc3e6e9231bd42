//! Activity proxy: path-prefix routes mounted as middleware.
//!
//! # Responsibilities
//! - Pick the owning route for a request (longest prefix)
//! - Forward matched requests, fall through on no match
//! - Conditional proxies that only claim requests a predicate accepts
//!
//! # Design Decisions
//! - Mounted as a layer so unmatched requests reach the inner router
//!   untouched (local routes, the 404 fallback, other proxies)
//! - Mount after local routes and the fallback are registered; axum only
//!   layers what already exists

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::Request as HttpRequest,
    middleware::{self, Next},
    response::Response,
    Router,
};
use tokio::time::Instant;

use crate::observability::metrics;
use crate::proxy::error::FailedRequest;
use crate::proxy::forward::Forwarder;
use crate::routing::{Matcher, MultiProxyConfig, ProxyRoute, RouteError, RouteTable};

/// A route table plus the client that forwards into it.
#[derive(Clone, Debug)]
pub struct ProxyRouter {
    table: Arc<RouteTable>,
    forwarder: Forwarder,
    condition: Option<Arc<dyn Matcher>>,
}

impl ProxyRouter {
    pub fn new(table: RouteTable, forwarder: Forwarder) -> Self {
        Self {
            table: Arc::new(table),
            forwarder,
            condition: None,
        }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Only claim requests `condition` accepts. Replaces any earlier condition.
    pub fn when(mut self, condition: impl Matcher + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// The route this proxy would forward `request` to, if any.
    pub fn route_for(&self, request: &HttpRequest<Body>) -> Option<Arc<ProxyRoute>> {
        if let Some(condition) = &self.condition {
            if !condition.matches(request) {
                return None;
            }
        }
        self.table.find(request.uri().path()).cloned()
    }

    /// Forward to `route`, turning failures into the route's error response.
    pub async fn proxy(&self, route: &ProxyRoute, request: HttpRequest<Body>) -> Response {
        let start = Instant::now();
        let method = request.method().to_string();
        let request_id = crate::http::request::request_id(&request);
        let failed = FailedRequest::capture(&route.name, &request);

        tracing::debug!(
            request_id = %request_id,
            route = %route.name,
            method = %method,
            path = %request.uri().path(),
            "Proxying request"
        );

        let response = match self.forwarder.dispatch(route, request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(
                    request_id = %request_id,
                    route = %route.name,
                    error = %error,
                    "Upstream error"
                );
                metrics::record_upstream_error(&route.name, error.kind());
                route.on_error.respond(&error, &failed)
            }
        };

        metrics::record_request(&route.name, &method, response.status().as_u16(), start);
        response
    }

    /// Wrap `app` so matching requests are proxied and the rest fall through.
    pub fn mount(self, app: Router) -> Router {
        app.layer(middleware::from_fn_with_state(self, proxy_middleware))
    }
}

pub async fn proxy_middleware(
    State(proxy): State<ProxyRouter>,
    request: Request,
    next: Next,
) -> Response {
    let route = proxy.route_for(&request);
    match route {
        Some(route) => proxy.proxy(&route, request).await,
        None => next.run(request).await,
    }
}

/// A proxy serving exactly one route.
pub fn create_activity_proxy(route: ProxyRoute, forwarder: Forwarder) -> Result<ProxyRouter, RouteError> {
    Ok(ProxyRouter::new(RouteTable::new(vec![route])?, forwarder))
}

/// Mount a single route onto `app`.
pub fn setup_activity_proxy(
    app: Router,
    route: ProxyRoute,
    forwarder: Forwarder,
) -> Result<Router, RouteError> {
    tracing::info!(route = %route.name, prefix = %route.prefix(), target = %route.target, "Activity proxy mounted");
    Ok(create_activity_proxy(route, forwarder)?.mount(app))
}

/// Mount every route in `config`, defaults merged with per-route overrides.
pub fn setup_multi_proxy(
    app: Router,
    config: MultiProxyConfig,
    forwarder: Forwarder,
) -> Result<Router, RouteError> {
    let table = RouteTable::new(config.into_routes())?;
    for route in table.routes() {
        tracing::info!(
            route = %route.name,
            prefix = %route.prefix(),
            target = %route.target,
            websocket = route.websocket,
            "Activity proxy mounted"
        );
    }
    Ok(ProxyRouter::new(table, forwarder).mount(app))
}

/// Restrict `proxy` to requests `predicate` accepts. Everything else reaches
/// the next handler unchanged.
pub fn create_conditional_proxy(proxy: ProxyRouter, predicate: impl Matcher + 'static) -> ProxyRouter {
    proxy.when(predicate)
}
