//! Lazily created, shared backing-store connections.

use std::sync::Arc;

use dashmap::DashMap;
use redis::aio::PubSub;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::store::{BackingHandle, FallbackStore, Namespace, StoreError};

/// Hands out one pooled handle per namespace and never lets a connection
/// failure escape to callers.
///
/// `None` from [`get_client`](Self::get_client) means "operate in fallback
/// mode", not "error".
#[derive(Debug)]
pub struct ConnectionManager {
    config: StoreConfig,
    handles: DashMap<Namespace, Arc<BackingHandle>>,
    /// Serializes connect attempts per namespace so a pool (and its error
    /// observer) is built at most once.
    creation_locks: DashMap<Namespace, Arc<Mutex<()>>>,
    failed_at: DashMap<Namespace, Instant>,
    /// Bumped by `close_namespace`; a connect that straddles a close is
    /// discarded.
    generations: DashMap<Namespace, u64>,
    fallbacks: DashMap<String, Arc<FallbackStore>>,
    subscriber_tokens: DashMap<Namespace, CancellationToken>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(config: StoreConfig) -> Self {
        if config.is_configured() {
            info!(address = %config.display_address(), "Backing store configured");
        } else {
            info!("No backing store configured, running in fallback mode");
        }

        Self {
            config,
            handles: DashMap::new(),
            creation_locks: DashMap::new(),
            failed_at: DashMap::new(),
            generations: DashMap::new(),
            fallbacks: DashMap::new(),
            subscriber_tokens: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn key_prefix(&self) -> &str {
        &self.config.key_prefix
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Return the shared handle for `namespace`, connecting on first use.
    ///
    /// Makes at most one bounded connect attempt per call and none while the
    /// namespace is cooling down from a previous failure. A cached handle
    /// that has gone down is treated the same way: `None` during the
    /// cool-down, then a single caller re-checks it.
    pub async fn get_client(&self, namespace: Namespace, owner: &str) -> Option<Arc<BackingHandle>> {
        if self.is_closed() {
            debug!(namespace, owner, "Connection manager closed");
            return None;
        }

        if let Some(handle) = self.cached(namespace) {
            return self.revive(namespace, owner, handle).await;
        }

        let Some(url) = self.config.url_for(namespace) else {
            debug!(namespace, owner, "Backing store not configured, using fallback");
            return None;
        };

        if self.cooling_down(namespace) {
            return None;
        }

        let lock = self.creation_lock(namespace);
        let _guard = lock.lock().await;

        // Another caller may have connected while we waited.
        if let Some(handle) = self.cached(namespace) {
            return self.revive(namespace, owner, handle).await;
        }
        if self.cooling_down(namespace) {
            return None;
        }
        let generation = self.generation(namespace);

        let attempt = tokio::time::timeout(
            self.config.connect_timeout(),
            BackingHandle::connect(&self.config, &url, namespace, owner),
        )
        .await
        .unwrap_or_else(|_| {
            Err(StoreError::Timeout {
                op: "CONNECT",
                after: self.config.connect_timeout(),
            })
        });

        match attempt {
            Ok(handle) if !self.is_closed() && self.generation(namespace) == generation => {
                let handle = Arc::new(handle);
                self.handles.insert(namespace, Arc::clone(&handle));
                self.failed_at.remove(&namespace);
                info!(
                    namespace,
                    owner,
                    address = %self.config.display_address(),
                    "Connected to backing store"
                );
                Some(handle)
            }
            Ok(handle) => {
                handle.close();
                debug!(namespace, owner, "Namespace closed while connecting, discarding handle");
                None
            }
            Err(e) => {
                self.failed_at.insert(namespace, Instant::now());
                warn!(
                    namespace,
                    owner,
                    address = %self.config.display_address(),
                    error = %e,
                    "Backing store unreachable, using fallback"
                );
                None
            }
        }
    }

    /// Open a second connection to `namespace` dedicated to subscriptions.
    pub async fn create_subscriber(&self, namespace: Namespace, owner: &str) -> Option<Subscriber> {
        let handle = self.get_client(namespace, owner).await?;

        match handle.open_pubsub().await {
            Ok(pubsub) => Some(Subscriber {
                namespace,
                owner: owner.to_string(),
                pubsub,
                cancel: self.subscriber_token(namespace),
            }),
            Err(e) => {
                warn!(namespace, owner, error = %e, "Failed to open subscriber connection");
                None
            }
        }
    }

    /// Process-wide local map for `owner`, created on first request.
    pub fn fallback_store(&self, owner: &str) -> Arc<FallbackStore> {
        self.fallbacks
            .entry(owner.to_string())
            .or_insert_with(|| Arc::new(FallbackStore::new(owner)))
            .value()
            .clone()
    }

    /// Non-blocking: looks at the cached handle only.
    pub fn is_available(&self, namespace: Namespace) -> bool {
        self.handles
            .get(&namespace)
            .is_some_and(|h| h.value().is_live())
    }

    /// Namespaces with a cached handle.
    pub fn namespaces(&self) -> Vec<Namespace> {
        let mut namespaces: Vec<Namespace> = self.handles.iter().map(|e| *e.key()).collect();
        namespaces.sort_unstable();
        namespaces
    }

    pub fn close_namespace(&self, namespace: Namespace) {
        *self.generations.entry(namespace).or_insert(0) += 1;
        let handle = self.handles.remove(&namespace).map(|(_, h)| h);
        if let Some((_, token)) = self.subscriber_tokens.remove(&namespace) {
            token.cancel();
        }
        self.failed_at.remove(&namespace);

        match handle {
            Some(handle) => {
                handle.close();
                info!(namespace, owner = handle.owner(), "Closed backing store namespace");
            }
            None => debug!(namespace, "Nothing to close"),
        }
    }

    /// Close everything. Later calls to `get_client` return `None`.
    pub fn close_all(&self) {
        if self.is_closed() {
            return;
        }
        self.shutdown.cancel();

        let namespaces: Vec<Namespace> = self.handles.iter().map(|e| *e.key()).collect();
        for namespace in namespaces {
            self.close_namespace(namespace);
        }
        self.subscriber_tokens.clear();
        self.creation_locks.clear();
        info!("Connection manager closed");
    }

    /// Fires on `close_all`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn cached(&self, namespace: Namespace) -> Option<Arc<BackingHandle>> {
        self.handles
            .get(&namespace)
            .filter(|h| !h.value().is_closed())
            .map(|h| Arc::clone(h.value()))
    }

    /// Hand back a live handle as is. A down one yields `None` while cooling
    /// down, after which the first caller to get here PINGs it.
    async fn revive(
        &self,
        namespace: Namespace,
        owner: &str,
        handle: Arc<BackingHandle>,
    ) -> Option<Arc<BackingHandle>> {
        if handle.is_live() {
            return Some(handle);
        }
        if handle.cooling_down(self.config.reconnect_cooldown()) {
            return None;
        }
        let reachable = {
            let Some(_recheck) = handle.begin_recheck() else {
                return None;
            };
            handle.ping().await
        };

        match reachable {
            Ok(()) => {
                info!(namespace, owner, "Backing store reachable again");
                Some(handle)
            }
            Err(e) => {
                debug!(namespace, owner, error = %e, "Backing store still unreachable");
                None
            }
        }
    }

    fn generation(&self, namespace: Namespace) -> u64 {
        self.generations.get(&namespace).map_or(0, |g| *g.value())
    }

    fn cooling_down(&self, namespace: Namespace) -> bool {
        let cooldown = self.config.reconnect_cooldown();
        self.failed_at
            .get(&namespace)
            .is_some_and(|at| at.value().elapsed() < cooldown)
    }

    fn creation_lock(&self, namespace: Namespace) -> Arc<Mutex<()>> {
        self.creation_locks
            .entry(namespace)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    fn subscriber_token(&self, namespace: Namespace) -> CancellationToken {
        self.subscriber_tokens
            .entry(namespace)
            .or_insert_with(|| self.shutdown.child_token())
            .value()
            .clone()
    }
}

/// A pub/sub connection plus the token that fires when its namespace closes.
pub struct Subscriber {
    namespace: Namespace,
    owner: String,
    pubsub: PubSub,
    cancel: CancellationToken,
}

impl Subscriber {
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn subscribe(&mut self, channel: &str) -> Result<(), StoreError> {
        self.pubsub.subscribe(channel).await?;
        Ok(())
    }

    pub fn into_pubsub(self) -> PubSub {
        self.pubsub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::store::fake::FakeRedis;

    fn unconfigured() -> ConnectionManager {
        ConnectionManager::new(StoreConfig::default())
    }

    /// Points at a port nothing listens on.
    fn unreachable() -> ConnectionManager {
        ConnectionManager::new(StoreConfig {
            host: Some("127.0.0.1".to_string()),
            port: 1,
            connect_timeout_ms: 200,
            command_timeout_ms: 200,
            reconnect_cooldown_ms: 60_000,
            ..StoreConfig::default()
        })
    }

    #[tokio::test]
    async fn test_unconfigured_returns_none() {
        let manager = unconfigured();
        assert!(manager.get_client(0, "test").await.is_none());
        assert!(manager.create_subscriber(0, "test").await.is_none());
        assert!(!manager.is_available(0));
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_open_and_cools_down() {
        let manager = unreachable();
        assert!(manager.get_client(2, "test").await.is_none());
        assert!(manager.cooling_down(2));

        let started = Instant::now();
        assert!(manager.get_client(2, "test").await.is_none());
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(!manager.is_available(2));
    }

    #[test]
    fn test_fallback_store_shared_per_owner() {
        let manager = unconfigured();
        let a = manager.fallback_store("cache:site");
        let b = manager.fallback_store("cache:site");
        let c = manager.fallback_store("cache:page");

        a.insert("k", vec![1], jiff::Timestamp::UNIX_EPOCH);
        assert_eq!(b.get("k").map(|e| e.value), Some(vec![1]));
        assert!(c.get("k").is_none());
    }

    #[test]
    fn test_close_is_safe_when_nothing_opened() {
        let manager = unconfigured();
        manager.close_namespace(4);
        manager.close_all();
        manager.close_all();
        assert!(manager.is_closed());
    }

    #[tokio::test]
    async fn test_closed_manager_hands_out_nothing() {
        let manager = ConnectionManager::new(StoreConfig {
            host: Some("127.0.0.1".to_string()),
            ..StoreConfig::default()
        });
        manager.close_all();
        assert!(manager.get_client(0, "test").await.is_none());
    }

    #[test]
    fn test_close_all_cancels_subscriber_tokens() {
        let manager = unconfigured();
        let token = manager.subscriber_token(0);
        manager.close_all();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_concurrent_first_use_builds_one_pool() {
        let store = FakeRedis::start().await;
        let manager = ConnectionManager::new(store.store_config());

        let handles = futures::future::join_all((0..8).map(|_| manager.get_client(3, "test"))).await;
        let first = handles[0].clone().unwrap();
        assert!(handles.iter().all(|h| h.as_ref().is_some_and(|h| Arc::ptr_eq(h, &first))));
        assert_eq!(store.connections(), 1);
        assert_eq!(store.commands("SELECT").len(), 1);
        assert_eq!(manager.namespaces(), vec![3]);
        assert!(manager.is_available(3));
    }

    #[tokio::test]
    async fn test_dead_handle_cools_down_and_is_rechecked_once() {
        let store = FakeRedis::start().await;
        let manager = ConnectionManager::new(StoreConfig {
            reconnect_cooldown_ms: 300,
            ..store.store_config()
        });
        let handle = manager.get_client(0, "test").await.unwrap();

        store.go_silent();
        assert!(handle.get("k").await.is_err());
        assert!(!manager.is_available(0));

        let started = Instant::now();
        for _ in 0..3 {
            assert!(manager.get_client(0, "test").await.is_none());
        }
        assert!(started.elapsed() < Duration::from_millis(50));

        tokio::time::sleep(Duration::from_millis(350)).await;
        let (checker, bystander) = tokio::join!(manager.get_client(0, "checker"), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let started = Instant::now();
            let handle = manager.get_client(0, "bystander").await;
            (handle, started.elapsed())
        });
        assert!(checker.is_none());
        assert!(bystander.0.is_none());
        assert!(bystander.1 < Duration::from_millis(50));

        // The failed re-check starts a fresh cool-down.
        let started = Instant::now();
        assert!(manager.get_client(0, "test").await.is_none());
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_dead_handle_recovers_after_cooldown() {
        let store = FakeRedis::start().await;
        let manager = ConnectionManager::new(StoreConfig {
            reconnect_cooldown_ms: 200,
            ..store.store_config()
        });
        let handle = manager.get_client(0, "test").await.unwrap();

        store.drop_connections();
        assert!(handle.get("k").await.is_err());
        assert!(manager.get_client(0, "test").await.is_none());

        store.resume();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let revived = manager.get_client(0, "test").await.unwrap();
        assert!(Arc::ptr_eq(&revived, &handle));
        assert!(manager.is_available(0));
    }

    #[tokio::test]
    async fn test_close_during_connect_discards_handle() {
        let store = FakeRedis::start().await;
        store.set_delay(Duration::from_millis(60));
        let manager = ConnectionManager::new(store.store_config());

        let (connected, ()) = tokio::join!(manager.get_client(0, "test"), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            manager.close_namespace(0);
        });
        assert!(connected.is_none());
        assert!(manager.namespaces().is_empty());

        store.set_delay(Duration::ZERO);
        assert!(manager.get_client(0, "test").await.is_some());
        assert_eq!(manager.namespaces(), vec![0]);
    }
}
