//! Cache error types.

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

/// Errors the cache reports to its owner, never to readers.
///
/// Store failures do not appear here; they degrade the result instead.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid cache kind '{0}': must be non-empty and free of ':', whitespace and glob characters")]
    InvalidKind(String),

    #[error("Sweep scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
}
