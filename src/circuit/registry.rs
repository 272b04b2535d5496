//! Circuit breakers whose state is shared through the backing store.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::circuit::{BreakerState, CircuitState};
use crate::clock::SharedClock;
use crate::config::{CircuitBreakerConfig, CircuitPolicy};
use crate::outcome::Outcome;
use crate::store::{ConnectionManager, StoreError};
use crate::sync::{CIRCUIT_UPDATE, InstanceId, SyncHandler, SyncMessage};

const OWNER: &str = "circuit-breaker";

/// Payload of a `circuit:update` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitUpdate {
    pub name: String,
    pub state: CircuitState,
}

/// Point-in-time view of one circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStatus {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub opened_at: Option<Timestamp>,
    pub retry_in_ms: u64,
    pub backing_available: bool,
}

/// Failure modes of [`CircuitBreakerRegistry::call`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    #[error("Circuit '{0}' is open")]
    Open(String),

    #[error("Call through circuit '{name}' timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    #[error("{0}")]
    Inner(E),
}

/// All breakers of one family.
///
/// Every operation first re-reads the circuit's record from the store, then
/// applies the transition to the local copy under that circuit's mutex, then
/// writes back. The lock is never held across a store call. If the store is
/// unreachable the local copy decides and the result is `Degraded`.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    connections: Arc<ConnectionManager>,
    clock: SharedClock,
    instance_id: InstanceId,
    key_prefix: String,
    circuits: DashMap<String, Arc<Mutex<CircuitState>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(
        config: CircuitBreakerConfig,
        connections: Arc<ConnectionManager>,
        clock: SharedClock,
        instance_id: InstanceId,
    ) -> Self {
        let key_prefix = format!("{}:circuit:{}", connections.key_prefix(), config.family);
        Self {
            config,
            connections,
            clock,
            instance_id,
            key_prefix,
            circuits: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state_key(&self, name: &str) -> String {
        format!("{}:{}", self.key_prefix, name)
    }

    /// Whether calls to `name` must be skipped right now.
    ///
    /// Returns `false` exactly once when an open circuit's reset timeout has
    /// passed; that caller is the half-open probe.
    pub async fn is_open(&self, name: &str) -> Outcome<bool> {
        let (cell, mut live) = self.refresh(name).await;
        let policy = self.config.policy_for(name);
        let now = self.clock.now();

        let (admission, snapshot) = {
            let mut state = lock(&cell);
            let admission = state.admit(&policy, now);
            (admission, admission.changed.then(|| state.clone()))
        };

        if let Some(snapshot) = snapshot {
            info!(circuit = name, "Circuit half-open, admitting probe");
            live &= self.persist(name, &snapshot, true).await;
        }
        Outcome::from_parts(!admission.allowed, live)
    }

    pub async fn record_failure(&self, name: &str, error: &str) -> Outcome<()> {
        let (cell, mut live) = self.refresh(name).await;
        let policy = self.config.policy_for(name);
        let now = self.clock.now();

        let (before, snapshot) = {
            let mut state = lock(&cell);
            let before = state.fail(error, &policy, now);
            (before, state.clone())
        };

        let transitioned = before != snapshot.state;
        if transitioned {
            warn!(
                circuit = name,
                failures = snapshot.failure_count,
                error,
                "Circuit opened"
            );
        } else {
            debug!(circuit = name, failures = snapshot.failure_count, error, "Recorded failure");
        }

        live &= self.persist(name, &snapshot, transitioned).await;
        Outcome::from_parts((), live)
    }

    pub async fn record_success(&self, name: &str) -> Outcome<()> {
        let (cell, mut live) = self.refresh(name).await;

        let (before, snapshot) = {
            let mut state = lock(&cell);
            let before = state.state;
            (before, state.succeed().then(|| state.clone()))
        };

        if let Some(snapshot) = snapshot {
            let transitioned = before != BreakerState::Closed;
            if transitioned {
                info!(circuit = name, from = %before, "Circuit closed");
            }
            live &= self.persist(name, &snapshot, transitioned).await;
        }
        Outcome::from_parts((), live)
    }

    pub async fn status(&self, name: &str) -> Outcome<CircuitStatus> {
        let (cell, live) = self.refresh(name).await;
        let policy = self.config.policy_for(name);
        let now = self.clock.now();
        let state = lock(&cell).clone();

        let retry_in = state.retry_in(&policy, now);
        let status = CircuitStatus {
            name: name.to_string(),
            state: state.state,
            failure_count: state.failure_count,
            last_error: state.last_error,
            opened_at: state.opened_at,
            retry_in_ms: u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
            backing_available: self.connections.is_available(self.config.namespace),
        };
        Outcome::from_parts(status, live)
    }

    /// Per-call timeout callers should apply to `name`.
    pub fn timeout(&self, name: &str) -> Duration {
        self.config.policy_for(name).call_timeout
    }

    pub fn policy(&self, name: &str) -> CircuitPolicy {
        self.config.policy_for(name)
    }

    /// Configured circuits plus every circuit used so far, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .config
            .circuits
            .iter()
            .cloned()
            .chain(self.circuits.iter().map(|e| e.key().clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Force `name` closed on every instance.
    pub async fn reset(&self, name: &str) -> Outcome<()> {
        let cell = self.cell(name);
        let snapshot = {
            let mut state = lock(&cell);
            *state = CircuitState::default();
            state.clone()
        };
        info!(circuit = name, "Circuit reset");
        let live = self.persist(name, &snapshot, true).await;
        Outcome::from_parts((), live)
    }

    /// Local copy only; no store round trip.
    pub fn snapshot(&self, name: &str) -> Option<CircuitState> {
        self.circuits.get(name).map(|cell| lock(cell.value()).clone())
    }

    /// Run `call` through the breaker for `name`, bounded by its timeout.
    ///
    /// Rejected calls never start. Timeouts and `Err` results count as
    /// failures.
    pub async fn call<T, E, F>(&self, name: &str, call: F) -> Result<T, CircuitError<E>>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if self.is_open(name).await.into_inner() {
            return Err(CircuitError::Open(name.to_string()));
        }

        let after = self.timeout(name);
        match tokio::time::timeout(after, call).await {
            Ok(Ok(value)) => {
                self.record_success(name).await;
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(name, &e.to_string()).await;
                Err(CircuitError::Inner(e))
            }
            Err(_) => {
                self.record_failure(name, &format!("timed out after {:?}", after))
                    .await;
                Err(CircuitError::Timeout {
                    name: name.to_string(),
                    after,
                })
            }
        }
    }

    fn cell(&self, name: &str) -> Arc<Mutex<CircuitState>> {
        self.circuits
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitState::default())))
            .value()
            .clone()
    }

    /// Pull the stored record over the local copy; returns whether the store
    /// answered.
    async fn refresh(&self, name: &str) -> (Arc<Mutex<CircuitState>>, bool) {
        let cell = self.cell(name);
        let Some(handle) = self.connections.get_client(self.config.namespace, OWNER).await else {
            return (cell, false);
        };

        match handle.get(&self.state_key(name)).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<CircuitState>(&bytes) {
                Ok(remote) => {
                    *lock(&cell) = remote;
                    (cell, true)
                }
                Err(e) => {
                    warn!(circuit = name, error = %e, "Ignoring unreadable circuit record");
                    (cell, true)
                }
            },
            Ok(None) => (cell, true),
            Err(e) => {
                warn!(circuit = name, error = %e, "Could not read circuit state, using local copy");
                (cell, false)
            }
        }
    }

    /// Write the record back and optionally broadcast it.
    async fn persist(&self, name: &str, state: &CircuitState, broadcast: bool) -> bool {
        let Some(handle) = self.connections.get_client(self.config.namespace, OWNER).await else {
            return false;
        };

        let result: Result<(), StoreError> = async {
            let ttl = Duration::from_secs(self.config.state_ttl_seconds);
            handle
                .set_ex(&self.state_key(name), &serde_json::to_vec(state)?, ttl)
                .await?;

            if broadcast {
                let message = SyncMessage::new(
                    CIRCUIT_UPDATE,
                    CircuitUpdate {
                        name: name.to_string(),
                        state: state.clone(),
                    },
                    self.clock.now(),
                    &self.instance_id,
                );
                handle.publish(&self.channel(), &message.to_json()?).await?;
            }
            Ok::<(), StoreError>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(circuit = name, error = %e, "Could not replicate circuit state");
                false
            }
        }
    }
}

impl SyncHandler for CircuitBreakerRegistry {
    type Payload = CircuitUpdate;

    fn channel(&self) -> String {
        format!("{}:sync", self.key_prefix)
    }

    fn action(&self) -> &'static str {
        CIRCUIT_UPDATE
    }

    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    fn apply(&self, message: SyncMessage<CircuitUpdate>) {
        let CircuitUpdate { name, state } = message.payload;
        debug!(
            circuit = %name,
            state = %state.state,
            from = %message.instance_id,
            "Applying remote circuit state"
        );
        *lock(&self.cell(&name)) = state;
    }
}

fn lock(cell: &Mutex<CircuitState>) -> MutexGuard<'_, CircuitState> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}
