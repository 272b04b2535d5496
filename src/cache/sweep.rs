//! Periodic eviction of stale local cache entries.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{CacheError, DistributedCache};

/// Wrapper around tokio-cron-scheduler running one repeated job per cache.
pub struct SweepScheduler {
    scheduler: Arc<Mutex<JobScheduler>>,
}

impl SweepScheduler {
    pub async fn new() -> Result<Self, CacheError> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Arc::new(Mutex::new(scheduler)),
        })
    }

    /// Sweep `cache` every `policy().sweep_interval`.
    pub async fn register(&self, cache: Arc<DistributedCache>) -> Result<Uuid, CacheError> {
        let interval = cache.policy().sweep_interval;
        let kind = cache.kind().to_string();

        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let cache = Arc::clone(&cache);
            Box::pin(async move {
                cache.sweep();
            })
        })?;

        let id = self.scheduler.lock().await.add(job).await?;
        debug!(kind = %kind, interval = ?interval, "Scheduled cache sweep");
        Ok(id)
    }

    pub async fn start(&self) -> Result<(), CacheError> {
        self.scheduler.lock().await.start().await?;
        info!("Cache sweep scheduler started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), CacheError> {
        self.scheduler.lock().await.shutdown().await?;
        info!("Cache sweep scheduler stopped");
        Ok(())
    }
}
