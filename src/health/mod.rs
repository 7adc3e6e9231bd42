//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Core proxy request
//!     → cache.rs check() (fresh result? return it)
//!     → otherwise one real probe, result cached for the TTL
//!
//! Connection failure observed by the proxy
//!     → mark_unhealthy() without probing
//! ```
//!
//! # Design Decisions
//! - Probes are driven by traffic, never by a background timer
//! - Health state is process-local

pub mod cache;

pub use cache::{CoreProxyState, HealthCache, HealthProbe, HttpHealthProbe};
