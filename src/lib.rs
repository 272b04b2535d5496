//! Fusion coordination layer
//!
//! Shared resilience and caching plumbing for fusion services: pooled
//! connections to a Redis backing store, circuit breakers replicated across
//! instances, and caches with broadcast invalidation. Every operation keeps
//! working when the store is down and says so through [`Outcome`].

pub mod cache;
pub mod circuit;
pub mod cli;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod logger;
pub mod outcome;
pub mod store;
pub mod sync;

pub use cache::{CacheStats, DistributedCache};
pub use circuit::{BreakerState, CircuitBreakerRegistry, CircuitState, CircuitStatus};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::Settings;
pub use coordinator::{Coordinator, HealthReport};
pub use outcome::Outcome;
pub use store::ConnectionManager;
