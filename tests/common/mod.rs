//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use activity_gateway::config::{parse_config, GatewayConfig};
use activity_gateway::{GatewayServer, Shutdown};
use axum::{
    body::Body,
    extract::{ws::WebSocketUpgrade, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// What an echo backend saw.
fn describe(name: &str, request: &Request<Body>) -> Value {
    let headers: Map<String, Value> = request
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or_default().to_string())))
        .collect();
    json!({
        "backend": name,
        "method": request.method().as_str(),
        "path": request.uri().path(),
        "path_and_query": request.uri().path_and_query().map(|pq| pq.as_str()),
        "headers": headers,
    })
}

/// Backend that answers every request with a JSON description of it. It
/// also sets `X-Frame-Options` so tests can check the gateway strips it.
pub async fn start_echo_backend(name: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move |request: Request<Body>| async move {
        let mut response = Json(describe(name, &request)).into_response();
        response
            .headers_mut()
            .insert("x-frame-options", "DENY".parse().unwrap());
        response
    });
    serve(app).await
}

/// Backend that waits `delay` before answering.
pub async fn start_slow_backend(delay: Duration) -> SocketAddr {
    let app = Router::new().fallback(move || async move {
        tokio::time::sleep(delay).await;
        "late"
    });
    serve(app).await
}

/// WebSocket backend echoing every data frame.
pub async fn start_ws_echo_backend() -> SocketAddr {
    let app = Router::new().route(
        "/{*path}",
        any(|ws: WebSocketUpgrade| async move {
            ws.on_upgrade(|mut socket| async move {
                while let Some(Ok(message)) = socket.recv().await {
                    if matches!(message, axum::extract::ws::Message::Close(_)) {
                        break;
                    }
                    if socket.send(message).await.is_err() {
                        break;
                    }
                }
            })
        }),
    );
    serve(app).await
}

/// Core stand-in: `/health` answers 200 or 503 per the switch and counts
/// probes; every other path echoes.
#[derive(Clone, Default)]
pub struct CoreBackend {
    pub healthy: Arc<AtomicBool>,
    pub probes: Arc<AtomicUsize>,
    pub hits: Arc<AtomicUsize>,
}

impl CoreBackend {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(healthy)),
            ..Self::default()
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub async fn start(&self) -> SocketAddr {
        let app = Router::new()
            .route(
                "/health",
                get(|State(core): State<CoreBackend>| async move {
                    core.probes.fetch_add(1, Ordering::SeqCst);
                    if core.healthy.load(Ordering::SeqCst) {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                }),
            )
            .fallback(|State(core): State<CoreBackend>, request: Request<Body>| async move {
                core.hits.fetch_add(1, Ordering::SeqCst);
                Json(describe("core", &request)).into_response()
            })
            .with_state(self.clone());
        serve(app).await
    }
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Parse a TOML config with no environment overrides.
pub fn config_from_toml(toml: &str) -> GatewayConfig {
    parse_config(toml, &HashMap::<String, String>::new()).unwrap()
}

/// Run a gateway on an ephemeral port.
pub async fn start_gateway(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GatewayServer::new(config).unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });
    (addr, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
