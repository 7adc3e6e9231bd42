//! Edge gateway for an embedded Discord Activity.
//!
//! Decides which origins may call the Activity, emits the CSP that lets it
//! be framed only by approved hosts, throttles callers per key, and proxies
//! by path prefix to the Activity backends or to the trusted Core service.

// Core subsystems
pub mod config;
pub mod http;
pub mod proxy;
pub mod routing;

// Traffic management
pub mod health;
pub mod security;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
