//! Backing store error types.

use std::time::Duration;

use redis::RedisError;
use thiserror::Error;

/// Errors raised by [`BackingHandle`](crate::store::BackingHandle) commands.
///
/// These never cross the public component boundary; the circuit breaker and
/// cache turn them into [`Outcome::Degraded`](crate::Outcome::Degraded).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Pool checkout failed: {0}")]
    Pool(String),

    #[error("Store command failed: {0}")]
    Redis(#[from] RedisError),

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Handle for namespace {0} is closed")]
    Closed(u8),
}

impl StoreError {
    /// Whether the error says something about reachability rather than about
    /// one bad command.
    pub fn is_connectivity(&self) -> bool {
        match self {
            StoreError::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
            }
            StoreError::Serialization(_) => false,
            StoreError::Connection(_)
            | StoreError::Pool(_)
            | StoreError::Timeout { .. }
            | StoreError::Closed(_) => true,
        }
    }
}
