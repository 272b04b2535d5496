//! Process-wide registry wiring the store, breakers and caches together.
//!
//! Build one [`Coordinator`] at startup, share it behind an `Arc`, call
//! [`start`](Coordinator::start) to run the background listeners and sweeps,
//! and [`shutdown`](Coordinator::shutdown) once on the way out.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use jiff::Timestamp;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheStats, DistributedCache, SweepScheduler};
use crate::circuit::{CircuitBreakerRegistry, CircuitStatus};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Settings;
use crate::store::{ConnectionManager, Namespace};
use crate::sync::{InstanceId, spawn_listener};

/// How long shutdown waits for each listener task to notice.
const LISTENER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceHealth {
    pub namespace: Namespace,
    pub available: bool,
}

/// Aggregated view of every circuit, cache and namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub instance_id: InstanceId,
    pub generated_at: Timestamp,
    pub backing_configured: bool,
    /// Some part of the report came from local state only.
    pub degraded: bool,
    pub namespaces: Vec<NamespaceHealth>,
    pub circuits: Vec<CircuitStatus>,
    pub caches: Vec<CacheStats>,
}

/// Listener tasks and the sweep scheduler; present only while started.
struct Background {
    listeners: Vec<JoinHandle<()>>,
    sweeps: SweepScheduler,
    attached: HashSet<String>,
}

pub struct Coordinator {
    settings: Settings,
    clock: SharedClock,
    instance_id: InstanceId,
    connections: Arc<ConnectionManager>,
    breakers: Arc<CircuitBreakerRegistry>,
    caches: DashMap<String, Arc<DistributedCache>>,
    background: Mutex<Option<Background>>,
}

impl Coordinator {
    pub fn new(settings: Settings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: Settings, clock: SharedClock) -> Self {
        let instance_id = InstanceId::generate();
        let connections = Arc::new(ConnectionManager::new(settings.store.clone()));
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            settings.circuit_breaker.clone(),
            Arc::clone(&connections),
            Arc::clone(&clock),
            instance_id.clone(),
        ));

        let coordinator = Self {
            settings,
            clock,
            instance_id,
            connections,
            breakers,
            caches: DashMap::new(),
            background: Mutex::new(None),
        };

        let kinds: Vec<String> = coordinator.settings.cache.kinds.keys().cloned().collect();
        for kind in kinds {
            if let Err(e) = coordinator.get_or_create(&kind) {
                warn!(error = %e, "Skipping configured cache kind");
            }
        }

        info!(instance_id = %coordinator.instance_id, "Coordinator created");
        coordinator
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// The cache for `kind`, created on first use.
    ///
    /// A kind created after [`start`](Self::start) gets its listener and
    /// sweep job immediately. Fails only for a kind that cannot form a key
    /// segment.
    pub async fn cache(&self, kind: &str) -> Result<Arc<DistributedCache>, CacheError> {
        let cache = self.get_or_create(kind)?;

        let mut background = self.background.lock().await;
        if let Some(background) = background.as_mut() {
            self.attach(background, &cache).await;
        }
        Ok(cache)
    }

    /// Kinds created so far, sorted.
    pub fn cache_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        kinds.sort();
        kinds
    }

    pub async fn is_started(&self) -> bool {
        self.background.lock().await.is_some()
    }

    /// Start sync listeners for the breakers and every cache, and the sweep
    /// scheduler. Calling it twice is a no-op.
    pub async fn start(&self) -> Result<(), CacheError> {
        let mut slot = self.background.lock().await;
        if slot.is_some() || self.connections.is_closed() {
            return Ok(());
        }

        let mut background = Background {
            listeners: Vec::new(),
            sweeps: SweepScheduler::new().await?,
            attached: HashSet::new(),
        };

        background.listeners.push(spawn_listener(
            Arc::clone(&self.connections),
            self.settings.circuit_breaker.namespace,
            Arc::clone(&self.breakers),
            self.settings.sync.clone(),
        ));

        let caches: Vec<Arc<DistributedCache>> =
            self.caches.iter().map(|e| Arc::clone(e.value())).collect();
        for cache in caches {
            self.attach(&mut background, &cache).await;
        }

        background.sweeps.start().await?;
        *slot = Some(background);

        info!(
            instance_id = %self.instance_id,
            backing_configured = self.settings.store.is_configured(),
            caches = self.caches.len(),
            "Coordinator started"
        );
        Ok(())
    }

    pub async fn health(&self) -> HealthReport {
        let mut degraded = false;

        let mut circuits = Vec::new();
        for name in self.breakers.names() {
            let status = self.breakers.status(&name).await;
            degraded |= status.is_degraded();
            circuits.push(status.into_inner());
        }

        let mut caches = Vec::new();
        let all: Vec<Arc<DistributedCache>> =
            self.caches.iter().map(|e| Arc::clone(e.value())).collect();
        for cache in all {
            let stats = cache.stats().await;
            degraded |= stats.is_degraded();
            caches.push(stats.into_inner());
        }
        caches.sort_by(|a, b| a.kind.cmp(&b.kind));

        let mut namespaces: Vec<Namespace> = self.connections.namespaces();
        namespaces.push(self.settings.circuit_breaker.namespace);
        namespaces.push(self.settings.cache.namespace);
        namespaces.sort_unstable();
        namespaces.dedup();

        HealthReport {
            instance_id: self.instance_id.clone(),
            generated_at: self.clock.now(),
            backing_configured: self.settings.store.is_configured(),
            degraded,
            namespaces: namespaces
                .into_iter()
                .map(|namespace| NamespaceHealth {
                    namespace,
                    available: self.connections.is_available(namespace),
                })
                .collect(),
            circuits,
            caches,
        }
    }

    /// Stop background work and close every connection. Idempotent.
    pub async fn shutdown(&self) {
        let background = self.background.lock().await.take();
        self.connections.close_all();

        let Some(background) = background else {
            return;
        };

        if let Err(e) = background.sweeps.stop().await {
            warn!(error = %e, "Failed to stop sweep scheduler");
        }
        for listener in background.listeners {
            if tokio::time::timeout(LISTENER_STOP_TIMEOUT, listener).await.is_err() {
                warn!("Sync listener did not stop in time");
            }
        }
        info!(instance_id = %self.instance_id, "Coordinator shut down");
    }

    fn get_or_create(&self, kind: &str) -> Result<Arc<DistributedCache>, CacheError> {
        if let Some(cache) = self.caches.get(kind) {
            return Ok(Arc::clone(cache.value()));
        }

        match self.caches.entry(kind.to_string()) {
            Entry::Occupied(e) => Ok(Arc::clone(e.get())),
            Entry::Vacant(e) => {
                let cache = Arc::new(DistributedCache::new(
                    kind,
                    self.settings.cache.policy_for(kind),
                    self.settings.cache.namespace,
                    Arc::clone(&self.connections),
                    Arc::clone(&self.clock),
                    self.instance_id.clone(),
                )?);
                debug!(kind, "Cache kind created");
                Ok(Arc::clone(e.insert(cache).value()))
            }
        }
    }

    async fn attach(&self, background: &mut Background, cache: &Arc<DistributedCache>) {
        if !background.attached.insert(cache.kind().to_string()) {
            return;
        }

        background.listeners.push(spawn_listener(
            Arc::clone(&self.connections),
            self.settings.cache.namespace,
            Arc::clone(cache),
            self.settings.sync.clone(),
        ));
        if let Err(e) = background.sweeps.register(Arc::clone(cache)).await {
            warn!(kind = %cache.kind(), error = %e, "Failed to schedule cache sweep");
        }
    }
}
