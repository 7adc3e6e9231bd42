//! Upstream proxying.
//!
//! # Data Flow
//! ```text
//! Request
//!     → core_service.rs (Core prefix: health gate, secret, fallback)
//!     → activity.rs (route table lookup, optional predicate)
//!     → forward.rs (HTTP exchange) or websocket.rs (frame bridge)
//!     → error.rs (ErrorStrategy on failure)
//!     → Response
//! ```
//!
//! # Design Decisions
//! - Every proxy is a middleware layer that either answers or calls `next`
//! - One pooled client shared by all routes

pub mod activity;
pub mod core_service;
pub mod error;
pub mod forward;
pub mod websocket;

pub use activity::{
    create_activity_proxy, create_conditional_proxy, setup_activity_proxy, setup_multi_proxy,
    ProxyRouter,
};
pub use core_service::{
    create_core_proxy, create_core_proxy_with_fallback, default_fallback, CoreProxy,
    CoreProxyError, FallbackHandler, FallbackReason,
};
pub use error::{ErrorStrategy, FailedRequest, ForwardError};
pub use forward::Forwarder;
