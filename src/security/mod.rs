//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (CSP and hardening headers on the way out)
//!     → origin.rs (CORS allowlist, preflight answers)
//!     → rate_limit.rs (per-key fixed window)
//!         → keys.rs (derive the client key)
//!         → store.rs (atomic increment)
//!     → Pass to proxies
//! ```
//!
//! # Design Decisions
//! - Disallowed origins get no CORS headers; the browser enforces the rest
//! - Rate limiting never fails closed on store errors, and never lets a
//!   key failure bypass limiting
//! - No trust in client input: forwarding and identity headers count only
//!   from configured trusted proxies

pub mod headers;
pub mod keys;
pub mod origin;
pub mod rate_limit;
pub mod store;

pub use headers::{security_headers_middleware, CspDirective, CspDirectives, SecurityHeaders};
pub use keys::{KeyStrategy, TrustedProxies};
pub use origin::{
    cors_middleware, InvalidOrigin, OriginAllowlist, OriginError, OriginPattern, OriginPolicy,
};
pub use rate_limit::{
    rate_limit_middleware, rate_limit_policy_middleware, RateLimitConfigError, RateLimitDecision,
    RateLimitPolicy, RateLimitRule, RateLimiter, RateLimiterConfig,
};
pub use store::{MemoryStore, RateLimitEntry, RateLimitStore, StoreError};
