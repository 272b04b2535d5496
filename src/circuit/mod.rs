//! Distributed circuit breaker.
//!
//! Each dependency (`name`) has one [`CircuitState`], created on first use.
//! The record lives in the backing store under
//! `{prefix}:circuit:{family}:{name}` and state transitions are broadcast on
//! `{prefix}:circuit:{family}:sync` so every instance converges.
//!
//! ```text
//!   CLOSED --failures >= threshold--> OPEN
//!   OPEN   --reset timeout elapsed--> HALF_OPEN (one probe admitted)
//!   HALF_OPEN --success--> CLOSED
//!   HALF_OPEN --failure--> OPEN
//! ```

mod registry;
mod state;

pub use registry::{CircuitBreakerRegistry, CircuitError, CircuitStatus, CircuitUpdate};
pub use state::{Admission, BreakerState, CircuitState};
