//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, pipeline assembly)
//!     → request.rs (request ID issued or kept)
//!     → [security layers, proxies]
//!     → response.rs (hop-by-hop stripping, JSON errors)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::GatewayServer;
