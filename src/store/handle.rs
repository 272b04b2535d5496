//! Pooled Redis connection for one logical database.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bb8::{ErrorSink, Pool, PooledConnection};
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{AsyncCommands, Client, RedisError};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::store::{Namespace, StoreError};

type RedisPool = Pool<Client>;

/// Keys fetched per SCAN round trip.
const SCAN_BATCH: usize = 500;

/// Keys removed per DEL call when deleting by pattern.
const DELETE_BATCH: usize = 500;

/// Handle to one namespace of the backing store.
///
/// Owned by the [`ConnectionManager`](crate::store::ConnectionManager); other
/// components borrow it through an `Arc` for the duration of an operation.
/// Every command is bounded by the configured command timeout and updates the
/// handle's liveness flag, which is what `is_available` reports.
pub struct BackingHandle {
    namespace: Namespace,
    owner: String,
    client: Client,
    pool: RedisPool,
    connect_timeout: Duration,
    command_timeout: Duration,
    liveness: Arc<Liveness>,
    rechecking: AtomicBool,
    closed: AtomicBool,
}

/// Reachability as last observed by commands and the pool.
#[derive(Debug, Default)]
struct Liveness {
    healthy: AtomicBool,
    failed_at: Mutex<Option<Instant>>,
}

impl Liveness {
    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn mark_up(&self) {
        self.healthy.store(true, Ordering::Relaxed);
        *self.failed_at.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn mark_down(&self) {
        self.healthy.store(false, Ordering::Relaxed);
        *self.failed_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn failed_at(&self) -> Option<Instant> {
        *self.failed_at.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the handle's recheck flag when the checking caller finishes or is
/// dropped mid-flight.
pub(crate) struct RecheckGuard<'a> {
    rechecking: &'a AtomicBool,
}

impl Drop for RecheckGuard<'_> {
    fn drop(&mut self) {
        self.rechecking.store(false, Ordering::Release);
    }
}

impl fmt::Debug for BackingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingHandle")
            .field("namespace", &self.namespace)
            .field("owner", &self.owner)
            .field("healthy", &self.liveness.is_healthy())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// bb8 error observer; installed once when the namespace's pool is built.
#[derive(Debug, Clone)]
struct PoolErrorObserver {
    namespace: Namespace,
    owner: String,
    liveness: Arc<Liveness>,
}

impl ErrorSink<RedisError> for PoolErrorObserver {
    fn sink(&self, error: RedisError) {
        self.liveness.mark_down();
        warn!(
            namespace = self.namespace,
            owner = %self.owner,
            error = %error,
            "Backing store connection error"
        );
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<RedisError>> {
        Box::new(self.clone())
    }
}

impl BackingHandle {
    /// Build the pool and prove the store answers a PING.
    ///
    /// Makes exactly one attempt; the caller bounds the whole call.
    pub(crate) async fn connect(
        config: &StoreConfig,
        url: &str,
        namespace: Namespace,
        owner: &str,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let liveness = Arc::new(Liveness::default());

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.command_timeout())
            .error_sink(Box::new(PoolErrorObserver {
                namespace,
                owner: owner.to_string(),
                liveness: Arc::clone(&liveness),
            }))
            .build(client.clone())
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let handle = Self {
            namespace,
            owner: owner.to_string(),
            client,
            pool,
            connect_timeout: config.connect_timeout(),
            command_timeout: config.command_timeout(),
            liveness,
            rechecking: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };

        handle.ping().await?;
        Ok(handle)
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Last observed reachability; never touches the network.
    pub fn is_live(&self) -> bool {
        !self.closed.load(Ordering::Relaxed) && self.liveness.is_healthy()
    }

    /// Down, and the last connectivity failure is younger than `cooldown`.
    pub(crate) fn cooling_down(&self, cooldown: Duration) -> bool {
        !self.is_live()
            && self
                .liveness
                .failed_at()
                .is_some_and(|at| at.elapsed() < cooldown)
    }

    /// Claim the right to re-check a down handle; `None` while another
    /// caller holds it.
    pub(crate) fn begin_recheck(&self) -> Option<RecheckGuard<'_>> {
        self.rechecking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RecheckGuard {
                rechecking: &self.rechecking,
            })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.liveness.healthy.store(false, Ordering::Relaxed);
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.bounded("PING", async {
            let mut conn = self.conn().await?;
            let conn_ref: &mut MultiplexedConnection = &mut conn;
            conn_ref.ping::<()>().await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.bounded("GET", async {
            let mut conn = self.conn().await?;
            let conn_ref: &mut MultiplexedConnection = &mut conn;
            let value: Option<Vec<u8>> = conn_ref.get(key).await?;
            Ok::<_, StoreError>(value)
        })
        .await
    }

    /// SET with a store-enforced expiry.
    pub async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let seconds = ttl.as_secs().max(1);
        self.bounded("SETEX", async {
            let mut conn = self.conn().await?;
            let conn_ref: &mut MultiplexedConnection = &mut conn;
            conn_ref.set_ex::<_, _, ()>(key, value, seconds).await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    pub async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.bounded("DEL", async {
            let mut conn = self.conn().await?;
            let conn_ref: &mut MultiplexedConnection = &mut conn;
            let removed: u64 = conn_ref.del(keys).await?;
            Ok::<_, StoreError>(removed)
        })
        .await
    }

    /// All keys matching a glob pattern, collected with a SCAN cursor.
    pub async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.bounded("SCAN", async {
            let mut conn = self.conn().await?;
            let conn_ref: &mut MultiplexedConnection = &mut conn;
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut *conn_ref)
                    .await?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok::<_, StoreError>(keys)
        })
        .await
    }

    /// SCAN then DEL in batches; returns how many keys were removed.
    pub async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        let keys = self.scan(pattern).await?;
        let mut removed = 0;
        for chunk in keys.chunks(DELETE_BATCH) {
            removed += self.delete(chunk).await?;
        }
        debug!(namespace = self.namespace, pattern, removed, "Deleted matching keys");
        Ok(removed)
    }

    pub async fn count_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        Ok(self.scan(pattern).await?.len() as u64)
    }

    /// Returns the number of subscribers that received the message.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<u64, StoreError> {
        self.bounded("PUBLISH", async {
            let mut conn = self.conn().await?;
            let conn_ref: &mut MultiplexedConnection = &mut conn;
            let receivers: u64 = conn_ref.publish(channel, payload).await?;
            Ok::<_, StoreError>(receivers)
        })
        .await
    }

    /// Open a dedicated pub/sub connection; a subscribed connection cannot
    /// issue regular commands.
    pub(crate) async fn open_pubsub(&self) -> Result<PubSub, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed(self.namespace));
        }
        match tokio::time::timeout(self.connect_timeout, self.client.get_async_pubsub()).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout {
                op: "SUBSCRIBE",
                after: self.connect_timeout,
            }),
        }
    }

    async fn conn(&self) -> Result<PooledConnection<'_, Client>, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed(self.namespace));
        }
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }

    /// Apply the command timeout and record reachability.
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let result = match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                op,
                after: self.command_timeout,
            }),
        };

        match &result {
            Ok(_) if !self.is_closed() => self.liveness.mark_up(),
            Ok(_) => {}
            Err(e) if e.is_connectivity() => self.liveness.mark_down(),
            Err(_) => {}
        }
        result
    }
}
