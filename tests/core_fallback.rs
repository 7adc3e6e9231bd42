//! Core proxy: secret injection, cached health and fallback.

use std::sync::Arc;
use std::time::Duration;

use activity_gateway::config::CoreConfig;
use activity_gateway::health::{HealthCache, HealthProbe, HttpHealthProbe};
use activity_gateway::proxy::{create_core_proxy, FallbackHandler, FallbackReason, Forwarder};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::IntoResponse,
    Router,
};
use reqwest::header as reqwest_header;
use tower::ServiceExt;

mod common;

const SECRET: &str = "gateway-only-secret";

fn core_toml(core: std::net::SocketAddr, ttl_secs: u64) -> String {
    format!(
        r#"
        listener.bind_address = "127.0.0.1:0"

        [core]
        base_url = "http://{core}"
        shared_secret = "{SECRET}"
        health_ttl_secs = {ttl_secs}
        "#
    )
}

fn core_config(base_url: String) -> CoreConfig {
    CoreConfig {
        base_url,
        shared_secret: SECRET.to_string(),
        ..CoreConfig::default()
    }
}

/// Fallback that names the reason it was called for.
fn reason_fallback() -> FallbackHandler {
    FallbackHandler::new(|request, reason| async move {
        let label = match reason {
            FallbackReason::Unhealthy => "unhealthy",
            FallbackReason::UpstreamFailed => "upstream-failed",
        };
        (StatusCode::SERVICE_UNAVAILABLE, format!("{label} {}", request.uri.path())).into_response()
    })
}

fn local() -> Router {
    Router::new().fallback(|| async { (StatusCode::NOT_FOUND, "local") })
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 16).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[derive(Debug)]
struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn probe(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn secret_is_injected_and_forged_values_replaced() {
    let core = common::CoreBackend::new(true);
    let core_addr = core.start().await;
    let (addr, _shutdown) = common::start_gateway(common::config_from_toml(&core_toml(core_addr, 30))).await;

    let response = common::client()
        .post(format!("http://{addr}/core/sessions?debug=1"))
        .header("x-core-secret", "forged")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let seen: serde_json::Value = response.json().await.unwrap();
    assert_eq!(seen["backend"], "core");
    assert_eq!(seen["method"], "POST");
    assert_eq!(seen["path_and_query"], "/core/sessions?debug=1");
    assert_eq!(seen["headers"]["x-core-secret"], SECRET);
}

#[tokio::test]
async fn unhealthy_core_serves_fallback_without_forwarding() {
    let core = common::CoreBackend::new(false);
    let core_addr = core.start().await;
    let (addr, _shutdown) = common::start_gateway(common::config_from_toml(&core_toml(core_addr, 15))).await;

    let response = common::client()
        .get(format!("http://{addr}/core/profile"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()[reqwest_header::RETRY_AFTER], "15");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "error": "Core service unavailable" }));
    assert_eq!(core.hits(), 0);
    assert_eq!(core.probes(), 1);
}

#[tokio::test]
async fn health_is_probed_once_per_ttl() {
    let core = common::CoreBackend::new(true);
    let core_addr = core.start().await;
    let (addr, _shutdown) = common::start_gateway(common::config_from_toml(&core_toml(core_addr, 60))).await;
    let client = common::client();

    for _ in 0..5 {
        let response = client.get(format!("http://{addr}/core/ping")).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    assert_eq!(core.probes(), 1);
    assert_eq!(core.hits(), 5);
}

#[tokio::test]
async fn non_core_paths_skip_the_health_check() {
    let core = common::CoreBackend::new(true);
    let core_addr = core.start().await;
    let (addr, _shutdown) = common::start_gateway(common::config_from_toml(&core_toml(core_addr, 60))).await;

    let response = common::client()
        .get(format!("http://{addr}/corex"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(core.probes(), 0);
}

#[tokio::test]
async fn healthz_reports_cached_core_health() {
    let core = common::CoreBackend::new(true);
    let core_addr = core.start().await;
    let (addr, _shutdown) = common::start_gateway(common::config_from_toml(&core_toml(core_addr, 60))).await;
    let client = common::client();

    let before: serde_json::Value = client
        .get(format!("http://{addr}/healthz"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(before["core_healthy"].is_null());

    client.get(format!("http://{addr}/core/ping")).send().await.unwrap();

    let after: serde_json::Value = client
        .get(format!("http://{addr}/healthz"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["status"], "ok");
    assert_eq!(after["core_healthy"], true);
    assert_eq!(core.probes(), 1);
}

#[tokio::test]
async fn recovers_once_the_ttl_lapses() {
    let core = common::CoreBackend::new(false);
    let core_addr = core.start().await;
    let config = core_config(format!("http://{core_addr}"));

    let forwarder = Forwarder::new();
    let probe = HttpHealthProbe::new(
        forwarder.client().clone(),
        &config.base_url,
        &config.health_path,
        Duration::from_secs(1),
    )
    .unwrap();
    let health = Arc::new(HealthCache::new(Arc::new(probe), Duration::from_millis(200)));
    let app = create_core_proxy(&config, forwarder)
        .unwrap()
        .with_fallback(health.clone(), reason_fallback())
        .mount(local());

    let get = || Request::builder().uri("/core/state").body(Body::empty()).unwrap();

    let response = app.clone().oneshot(get()).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_text(response).await, "unhealthy /core/state");
    assert_eq!(health.cached(), Some(false));

    core.set_healthy(true);

    // Still inside the TTL: the failure is reused.
    let response = app.clone().oneshot(get()).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(core.probes(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let response = app.oneshot(get()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(health.cached(), Some(true));
    assert_eq!(core.probes(), 2);
    assert_eq!(core.hits(), 1);
}

#[tokio::test]
async fn connection_failure_marks_core_down_and_falls_back() {
    let dead = common::unused_addr().await;
    let config = core_config(format!("http://{dead}"));

    let health = Arc::new(HealthCache::new(Arc::new(AlwaysHealthy), Duration::from_secs(60)));
    let app = create_core_proxy(&config, Forwarder::new())
        .unwrap()
        .with_fallback(health.clone(), reason_fallback())
        .mount(local());

    let request = Request::builder()
        .uri("/core/orders")
        .header(header::ACCEPT, "application/json")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_text(response).await, "upstream-failed /core/orders");
    assert_eq!(health.cached(), Some(false));

    // The next request is answered from the cached failure.
    let request = Request::builder().uri("/core/orders").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(body_text(response).await, "unhealthy /core/orders");
}

#[tokio::test]
async fn without_fallback_failures_use_the_generic_error() {
    let dead = common::unused_addr().await;
    let app = create_core_proxy(&core_config(format!("http://{dead}")), Forwarder::new())
        .unwrap()
        .mount(local());

    let request = Request::builder().uri("/core/orders").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        common::body_json(response).await,
        serde_json::json!({ "error": "connection failed" })
    );
}

#[tokio::test]
async fn core_timing_out_mid_request_serves_the_fallback() {
    let slow = common::start_slow_backend(Duration::from_secs(3)).await;
    let config = CoreConfig {
        timeout_secs: 1,
        ..core_config(format!("http://{slow}"))
    };

    let health = Arc::new(HealthCache::new(Arc::new(AlwaysHealthy), Duration::from_secs(60)));
    let app = create_core_proxy(&config, Forwarder::new())
        .unwrap()
        .with_fallback(health.clone(), FallbackHandler::unavailable(Duration::from_secs(15)))
        .mount(local());

    let started = std::time::Instant::now();
    let request = Request::builder().uri("/core/slow").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()[header::RETRY_AFTER], "15");
    assert_eq!(
        common::body_json(response).await,
        serde_json::json!({ "error": "Core service unavailable" })
    );
    // A slow answer is not a dead host; the health verdict stands.
    assert_eq!(health.cached(), Some(true));
}
