//! HTTP forwarding to upstream backends.
//!
//! # Responsibilities
//! - Rebuild the inbound request for the route's target
//! - Strip hop-by-hop headers in both directions
//! - Append `X-Forwarded-*` headers and set `Host`
//! - Bound each exchange by the route timeout
//!
//! # Design Decisions
//! - Bodies are streamed, never buffered
//! - Dropping the returned future aborts the upstream request
//! - No retries: upstream requests may not be idempotent

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, Uri},
    response::Response,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::http::response::{is_websocket_upgrade, strip_hop_by_hop};
use crate::proxy::error::ForwardError;
use crate::proxy::websocket;
use crate::routing::ProxyRoute;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared upstream HTTP client. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl Forwarder {
    pub fn new() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }

    /// The pooled client, for other callers of the same upstreams.
    pub fn client(&self) -> &Client<HttpConnector, Body> {
        &self.client
    }

    /// Forward over HTTP, or bridge a WebSocket when the route allows it.
    pub async fn dispatch(
        &self,
        route: &ProxyRoute,
        request: Request<Body>,
    ) -> Result<Response, ForwardError> {
        if route.websocket && is_websocket_upgrade(request.headers()) {
            return websocket::proxy_websocket(route, request).await;
        }
        self.forward(route, request).await
    }

    /// Forward one HTTP exchange to `route`.
    pub async fn forward(
        &self,
        route: &ProxyRoute,
        request: Request<Body>,
    ) -> Result<Response, ForwardError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri: Uri = route.upstream_url("http", path_and_query).parse()?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        append_forwarded_headers(&mut headers, peer);
        if let Some(host) = uri.authority().and_then(|a| HeaderValue::from_str(a.as_str()).ok()) {
            headers.insert(header::HOST, host);
        }

        let mut builder = Request::builder().method(parts.method).uri(uri);
        if let Some(h) = builder.headers_mut() {
            *h = headers;
        }
        let upstream_request = builder.body(body)?;

        let response = match tokio::time::timeout(route.timeout, self.client.request(upstream_request)).await {
            Err(_) => return Err(ForwardError::Timeout(route.timeout)),
            Ok(Err(e)) if e.is_connect() => return Err(ForwardError::Connect(e)),
            Ok(Err(e)) => return Err(ForwardError::Upstream(e)),
            Ok(Ok(response)) => response,
        };

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Append the peer to `X-Forwarded-For`, and fill `X-Forwarded-Proto` and
/// `X-Forwarded-Host` when an outer hop has not already.
pub fn append_forwarded_headers(headers: &mut HeaderMap, peer: Option<SocketAddr>) {
    if let Some(peer) = peer {
        let ip = peer.ip().to_string();
        let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }

    if !headers.contains_key(&X_FORWARDED_HOST) {
        if let Some(host) = headers.get(header::HOST).cloned() {
            headers.insert(X_FORWARDED_HOST, host);
        }
    }
}
