//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path)
//!     → router.rs (route lookup, longest prefix first)
//!     → matcher.rs (prefix and predicate conditions)
//!     → rewrite.rs (upstream path)
//!     → Return: matched ProxyRoute or NoMatch
//!
//! Route Compilation (at startup):
//!     MultiProxyConfig (defaults + overrides)
//!     → ProxyRoute[]
//!     → Sort by prefix length, reject duplicates
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - Regex only in rewrite, never in lookup
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod rewrite;
pub mod router;

pub use matcher::{FnMatcher, Matcher, PathPrefixMatcher};
pub use rewrite::PathRewrite;
pub use router::{MultiProxyConfig, ProxyRoute, RouteDefaults, RouteError, RouteOverride, RouteTable};
