//! Forwarding failures and how they become responses.
//!
//! # Design Decisions
//! - Forwarding returns `Result<Response, ForwardError>`; callers pick the
//!   response through an [`ErrorStrategy`]
//! - Error bodies are generic so upstream addresses never reach clients

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::http::response::json_error;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream connection failed: {0}")]
    Connect(#[source] hyper_util::client::legacy::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[source] hyper_util::client::legacy::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("invalid upstream uri: {0}")]
    InvalidUri(#[from] axum::http::uri::InvalidUri),

    #[error("failed to build upstream request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("websocket upstream failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("websocket upgrade rejected: {0}")]
    Upgrade(String),
}

impl ForwardError {
    /// The backend could not be reached at all.
    pub fn is_connect(&self) -> bool {
        match self {
            Self::Connect(_) => true,
            Self::WebSocket(tokio_tungstenite::tungstenite::Error::Io(_)) => true,
            _ => false,
        }
    }

    /// Status the generic strategy answers with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upgrade(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Upstream(_) => "upstream",
            Self::Timeout(_) => "timeout",
            Self::InvalidUri(_) | Self::Request(_) => "request",
            Self::WebSocket(_) => "websocket",
            Self::Upgrade(_) => "upgrade",
        }
    }
}

/// What is known about a request that failed to forward. The original
/// request has been consumed by then.
#[derive(Debug, Clone)]
pub struct FailedRequest {
    pub route: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl FailedRequest {
    pub fn capture(route: &str, request: &Request<Body>) -> Self {
        Self {
            route: route.to_string(),
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
        }
    }
}

pub type ErrorHandlerFn = Arc<dyn Fn(&ForwardError, &FailedRequest) -> Response + Send + Sync>;

/// How a route answers when forwarding fails.
#[derive(Clone, Default)]
pub enum ErrorStrategy {
    /// 502 `{"error":"connection failed"}`, 504 on timeout.
    #[default]
    Generic,
    /// Fixed status and body.
    Static { status: StatusCode, body: String },
    /// Caller-supplied response builder.
    Handler(ErrorHandlerFn),
}

impl ErrorStrategy {
    pub fn handler<F>(f: F) -> Self
    where
        F: Fn(&ForwardError, &FailedRequest) -> Response + Send + Sync + 'static,
    {
        Self::Handler(Arc::new(f))
    }

    pub fn respond(&self, error: &ForwardError, request: &FailedRequest) -> Response {
        match self {
            Self::Generic => generic_error_response(error),
            Self::Static { status, body } => (*status, body.clone()).into_response(),
            Self::Handler(f) => f(error, request),
        }
    }
}

impl fmt::Debug for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic => f.write_str("Generic"),
            Self::Static { status, .. } => f.debug_struct("Static").field("status", status).finish(),
            Self::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

pub fn generic_error_response(error: &ForwardError) -> Response {
    match error.status() {
        StatusCode::GATEWAY_TIMEOUT => json_error(StatusCode::GATEWAY_TIMEOUT, "upstream timed out"),
        StatusCode::BAD_REQUEST => json_error(StatusCode::BAD_REQUEST, "invalid websocket upgrade"),
        status => json_error(status, "connection failed"),
    }
}
