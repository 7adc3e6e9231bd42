//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, latency, policy rejections, Core health)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): proxied requests by route, method, status
//! - `gateway_request_duration_seconds` (histogram): upstream latency by route
//! - `gateway_upstream_errors_total` (counter): forwarding failures by route, kind
//! - `gateway_rate_limited_total` (counter): 429s by limiter
//! - `gateway_cors_rejected_total` (counter): requests from non-allowlisted origins
//! - `gateway_core_healthy` (gauge): 1=healthy, 0=unhealthy
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Labels are route and limiter names, never raw paths

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tokio::time::Instant;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(address = %addr, "Prometheus metrics exporter listening");
    Ok(())
}

pub fn record_request(route: &str, method: &str, status: u16, start: Instant) {
    counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error(route: &str, kind: &'static str) {
    counter!(
        "gateway_upstream_errors_total",
        "route" => route.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_rate_limited(limiter: &str) {
    counter!("gateway_rate_limited_total", "limiter" => limiter.to_string()).increment(1);
}

pub fn record_cors_rejected() {
    counter!("gateway_cors_rejected_total").increment(1);
}

pub fn record_core_health(healthy: bool) {
    gauge!("gateway_core_healthy").set(if healthy { 1.0 } else { 0.0 });
}
