//! Configuration management for fusion-coord
//!
//! Layered loading with support for:
//! - TOML configuration files
//! - Environment variable overrides
//! - Per-environment overlays (development, test, staging, production)
//!
//! # Configuration Priority (lowest to highest)
//! 1. Built-in defaults
//! 2. `default.toml`
//! 3. `{environment}.toml`
//! 4. `local.toml`
//! 5. `FUSION_*` environment variables
//!
//! ```toml
//! [store]
//! host = "redis.internal"
//! port = 6379
//! command_timeout_ms = 1000
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! reset_timeout_ms = 30000
//!
//! [circuit_breaker.overrides."ai:provider"]
//! failure_threshold = 3
//!
//! [cache.kinds.site]
//! ttl_seconds = 60
//! ```

pub mod environment;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use environment::Environment;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use settings::{
    ApplicationConfig, CacheConfig, CacheKindConfig, CachePolicy, CircuitBreakerConfig,
    CircuitOverride, CircuitPolicy, LoggerSettings, Settings, StoreConfig, SyncConfig,
};
