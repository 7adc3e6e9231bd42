//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → env.rs (environment overrides and extras)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → compiled into per-subsystem state at startup
//! ```
//!
//! # Design Decisions
//! - Config is read once at startup; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Any validation error is fatal before the listener binds

pub mod env;
pub mod loader;
pub mod schema;
pub mod validation;

pub use env::{EnvSource, ProcessEnv};
pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CoreConfig, CorsConfig, EmbeddingConfig, GatewayConfig, KeyStrategyName, ObservabilityConfig,
    ProxyRouteConfig, RateLimitConfig, RateLimitPresetName, RateLimitRuleConfig,
    RewriteRuleConfig,
};
pub use validation::ValidationError;
