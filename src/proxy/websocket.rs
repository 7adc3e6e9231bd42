//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Complete upgrade handshake with client
//! - Establish WebSocket connection to backend
//! - Bidirectional frame forwarding
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Gateway ←──── WebSocket frames ────→ Backend
//! ```
//!
//! # Design Decisions
//! - Backend connected before the client is upgraded, so an unreachable
//!   backend still gets an ordinary HTTP error response
//! - Message-level forwarding, no buffering beyond one message
//! - Close frames propagated in both directions
//! - Either side closing tears down the whole bridge

use axum::{
    body::Body,
    extract::{
        ws::{self, WebSocket, WebSocketUpgrade},
        FromRequestParts,
    },
    http::{header, HeaderMap, HeaderName, Request},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        protocol::{frame::coding::CloseCode, CloseFrame},
    },
    MaybeTlsStream, WebSocketStream,
};

use crate::http::response::HOP_BY_HOP_HEADERS;
use crate::proxy::error::ForwardError;
use crate::routing::ProxyRoute;

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake headers that tungstenite generates itself.
static HANDSHAKE_HEADERS: [HeaderName; 5] = [
    header::HOST,
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_EXTENSIONS,
    header::CONTENT_LENGTH,
];

/// Connect to the backend socket for `route`, then upgrade the client and
/// bridge the two.
pub async fn proxy_websocket(
    route: &ProxyRoute,
    request: Request<Body>,
) -> Result<Response, ForwardError> {
    let (mut parts, _body) = request.into_parts();
    let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &())
        .await
        .map_err(|rejection| ForwardError::Upgrade(rejection.to_string()))?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut backend_request = route
        .upstream_url("ws", path_and_query)
        .into_client_request()?;
    copy_client_headers(&parts.headers, backend_request.headers_mut());

    let (backend, handshake) = tokio::time::timeout(route.timeout, connect_async(backend_request))
        .await
        .map_err(|_| ForwardError::Timeout(route.timeout))??;

    let upgrade = match handshake
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        Some(protocol) => upgrade.protocols([protocol.to_owned()]),
        None => upgrade,
    };

    let route_name = route.name.clone();
    tracing::debug!(route = %route_name, "WebSocket backend connected, upgrading client");

    let failed_route = route_name.clone();
    Ok(upgrade
        .on_failed_upgrade(move |error| {
            tracing::warn!(route = %failed_route, error = %error, "Client WebSocket upgrade failed");
        })
        .on_upgrade(move |client| bridge(client, backend, route_name)))
}

/// Copy end-to-end client headers onto the backend handshake.
fn copy_client_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if HANDSHAKE_HEADERS.contains(name) || HOP_BY_HOP_HEADERS.contains(name) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

/// Pump messages both ways until either side closes or errors.
async fn bridge(client: WebSocket, backend: BackendSocket, route: String) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut backend_tx, mut backend_rx) = backend.split();

    let client_to_backend = async {
        while let Some(Ok(message)) = client_rx.next().await {
            let closing = matches!(message, ws::Message::Close(_));
            if backend_tx.send(to_backend(message)).await.is_err() || closing {
                break;
            }
        }
        let _ = backend_tx.close().await;
    };

    let backend_to_client = async {
        while let Some(Ok(message)) = backend_rx.next().await {
            let Some(message) = to_client(message) else {
                continue;
            };
            let closing = matches!(message, ws::Message::Close(_));
            if client_tx.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::select! {
        _ = client_to_backend => {}
        _ = backend_to_client => {}
    }
    tracing::debug!(route = %route, "WebSocket bridge closed");
}

fn to_backend(message: ws::Message) -> tungstenite::Message {
    match message {
        ws::Message::Text(text) => tungstenite::Message::Text(text.as_str().into()),
        ws::Message::Binary(data) => tungstenite::Message::Binary(data),
        ws::Message::Ping(data) => tungstenite::Message::Ping(data),
        ws::Message::Pong(data) => tungstenite::Message::Pong(data),
        ws::Message::Close(frame) => tungstenite::Message::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().into(),
        })),
    }
}

fn to_client(message: tungstenite::Message) -> Option<ws::Message> {
    Some(match message {
        tungstenite::Message::Text(text) => ws::Message::Text(text.as_str().into()),
        tungstenite::Message::Binary(data) => ws::Message::Binary(data),
        tungstenite::Message::Ping(data) => ws::Message::Ping(data),
        tungstenite::Message::Pong(data) => ws::Message::Pong(data),
        tungstenite::Message::Close(frame) => ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().into(),
        })),
        tungstenite::Message::Frame(_) => return None,
    })
}
