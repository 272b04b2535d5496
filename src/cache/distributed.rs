//! Read-through cache with broadcast invalidation.

use std::sync::Arc;

use jiff::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CacheError;
use crate::clock::SharedClock;
use crate::config::CachePolicy;
use crate::outcome::Outcome;
use crate::store::{BackingHandle, ConnectionManager, FallbackStore, Namespace, StoreError, escape_glob};
use crate::sync::{CACHE_INVALIDATE, InstanceId, SyncHandler, SyncMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationScope {
    Key,
    All,
}

/// Payload of a `cache:invalidate` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationPayload {
    pub scope: InvalidationScope,
    pub key: Option<String>,
    pub version: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub kind: String,
    pub local_size: usize,
    pub backing_available: bool,
    /// Keys of this kind in the store; `None` when it could not be asked.
    pub backing_size: Option<u64>,
}

/// One cache kind.
///
/// The store copy is authoritative and expires natively. The local copy
/// answers when the store misses or is unreachable, and is pruned by
/// [`sweep`](Self::sweep) and by TTL checks on read.
#[derive(Debug)]
pub struct DistributedCache {
    kind: String,
    policy: CachePolicy,
    namespace: Namespace,
    owner: String,
    key_prefix: String,
    connections: Arc<ConnectionManager>,
    local: Arc<FallbackStore>,
    clock: SharedClock,
    instance_id: InstanceId,
}

impl DistributedCache {
    pub fn new(
        kind: &str,
        policy: CachePolicy,
        namespace: Namespace,
        connections: Arc<ConnectionManager>,
        clock: SharedClock,
        instance_id: InstanceId,
    ) -> Result<Self, CacheError> {
        if !crate::cache::is_valid_kind(kind) {
            return Err(CacheError::InvalidKind(kind.to_string()));
        }

        let owner = format!("cache:{}", kind);
        let key_prefix = format!("{}:cache:{}", connections.key_prefix(), kind);
        let local = connections.fallback_store(&owner);
        Ok(Self {
            kind: kind.to_string(),
            policy,
            namespace,
            owner,
            key_prefix,
            connections,
            local,
            clock,
            instance_id,
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn store_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    pub async fn get(&self, key: &str) -> Outcome<Option<Vec<u8>>> {
        let mut live = false;

        if let Some(handle) = self.client().await {
            match handle.get(&self.store_key(key)).await {
                Ok(Some(value)) => return Outcome::Live(Some(value)),
                Ok(None) => live = true,
                Err(e) => warn!(kind = %self.kind, key, error = %e, "Cache read failed, using local copy"),
            }
        }

        Outcome::from_parts(self.get_local(key), live)
    }

    pub async fn set(&self, key: &str, value: Vec<u8>) -> Outcome<()> {
        let mut live = false;

        if let Some(handle) = self.client().await {
            match handle.set_ex(&self.store_key(key), &value, self.policy.ttl).await {
                Ok(()) => live = true,
                Err(e) => warn!(kind = %self.kind, key, error = %e, "Cache write failed, kept locally"),
            }
        }

        self.local.insert(key, value, self.clock.now());
        Outcome::from_parts((), live)
    }

    /// Decoded [`get`](Self::get); an undecodable value reads as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Outcome<Option<T>> {
        self.get(key).await.map(|value| {
            value.and_then(|bytes| match serde_json::from_slice(&bytes) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    warn!(kind = %self.kind, key, error = %e, "Discarding undecodable cache value");
                    None
                }
            })
        })
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<Outcome<()>, CacheError> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.set(key, bytes).await)
    }

    /// Drop `key` and everything nested under `key:` on every instance.
    ///
    /// Local state is purged first so the value is gone here even if the
    /// store is unreachable; the broadcast goes out last.
    pub async fn invalidate(&self, key: &str) -> Outcome<()> {
        let purged = self.local.remove_prefix(key);
        debug!(kind = %self.kind, key, purged, "Purged local entries");

        let Some(handle) = self.client().await else {
            return Outcome::Degraded(());
        };

        let result: Result<(), StoreError> = async {
            let exact = self.store_key(key);
            let nested = format!("{}:*", escape_glob(&exact));
            handle.delete(std::slice::from_ref(&exact)).await?;
            handle.delete_matching(&nested).await?;
            self.broadcast(&handle, InvalidationScope::Key, Some(key)).await?;
            Ok::<(), StoreError>(())
        }
        .await;

        match result {
            Ok(()) => Outcome::Live(()),
            Err(e) => {
                warn!(kind = %self.kind, key, error = %e, "Invalidation not fully propagated");
                Outcome::Degraded(())
            }
        }
    }

    /// Drop every entry of this kind on every instance.
    pub async fn invalidate_all(&self) -> Outcome<()> {
        let purged = self.local.clear();
        info!(kind = %self.kind, purged, "Invalidating cache kind");

        let Some(handle) = self.client().await else {
            return Outcome::Degraded(());
        };

        let result: Result<(), StoreError> = async {
            let pattern = format!("{}:*", escape_glob(&self.key_prefix));
            handle.delete_matching(&pattern).await?;
            self.broadcast(&handle, InvalidationScope::All, None).await?;
            Ok::<(), StoreError>(())
        }
        .await;

        match result {
            Ok(()) => Outcome::Live(()),
            Err(e) => {
                warn!(kind = %self.kind, error = %e, "Invalidation not fully propagated");
                Outcome::Degraded(())
            }
        }
    }

    pub async fn stats(&self) -> Outcome<CacheStats> {
        let backing_size = match self.client().await {
            Some(handle) => {
                let pattern = format!("{}:*", escape_glob(&self.key_prefix));
                match handle.count_matching(&pattern).await {
                    Ok(count) => Some(count),
                    Err(e) => {
                        warn!(kind = %self.kind, error = %e, "Could not count cache keys");
                        None
                    }
                }
            }
            None => None,
        };

        let stats = CacheStats {
            kind: self.kind.clone(),
            local_size: self.local.len(),
            backing_available: self.connections.is_available(self.namespace),
            backing_size,
        };
        let live = stats.backing_size.is_some();
        Outcome::from_parts(stats, live)
    }

    /// Evict local entries older than the TTL; returns how many went.
    pub fn sweep(&self) -> usize {
        let evicted = self.local.retain_fresh(self.clock.now(), self.policy.ttl);
        if evicted > 0 {
            debug!(kind = %self.kind, evicted, remaining = self.local.len(), "Swept expired entries");
        }
        evicted
    }

    fn get_local(&self, key: &str) -> Option<Vec<u8>> {
        let entry = self.local.get(key)?;
        if entry.is_expired(self.clock.now(), self.policy.ttl) {
            self.local.remove(key);
            return None;
        }
        Some(entry.value)
    }

    async fn client(&self) -> Option<Arc<BackingHandle>> {
        self.connections.get_client(self.namespace, &self.owner).await
    }

    async fn broadcast(
        &self,
        handle: &BackingHandle,
        scope: InvalidationScope,
        key: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let payload = InvalidationPayload {
            scope,
            key: key.map(str::to_string),
            version: now,
        };
        let message = SyncMessage::new(CACHE_INVALIDATE, payload, now, &self.instance_id);
        handle.publish(&self.channel(), &message.to_json()?).await?;
        Ok(())
    }
}

impl SyncHandler for DistributedCache {
    type Payload = InvalidationPayload;

    fn channel(&self) -> String {
        format!("{}:invalidate", self.key_prefix)
    }

    fn action(&self) -> &'static str {
        CACHE_INVALIDATE
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn apply(&self, message: SyncMessage<InvalidationPayload>) {
        let payload = message.payload;
        match (payload.scope, payload.key.as_deref()) {
            (InvalidationScope::Key, Some(key)) => {
                let purged = self.local.remove_prefix(key);
                debug!(kind = %self.kind, key, purged, from = %message.instance_id, "Remote invalidation");
            }
            (InvalidationScope::Key, None) => {
                warn!(kind = %self.kind, from = %message.instance_id, "Key invalidation without a key");
            }
            (InvalidationScope::All, _) => {
                let purged = self.local.clear();
                debug!(kind = %self.kind, purged, from = %message.instance_id, "Remote invalidation of all entries");
            }
        }
    }
}
