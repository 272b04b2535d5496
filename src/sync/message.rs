//! Wire format shared by every broadcast channel.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Action tag for replicated circuit state.
pub const CIRCUIT_UPDATE: &str = "circuit:update";

/// Action tag for cache invalidation events.
pub const CACHE_INVALIDATE: &str = "cache:invalidate";

/// Identifies one running process; used to drop our own broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// `{pid}-{random}`: unique across restarts and across hosts sharing a pid.
    pub fn generate() -> Self {
        Self(format!("{}-{}", std::process::id(), Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Envelope published on a sync channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage<P> {
    pub action: String,
    pub payload: P,
    pub timestamp: Timestamp,
    pub instance_id: InstanceId,
}

impl<P> SyncMessage<P> {
    pub fn new(action: &str, payload: P, timestamp: Timestamp, instance_id: &InstanceId) -> Self {
        Self {
            action: action.to_string(),
            payload,
            timestamp,
            instance_id: instance_id.clone(),
        }
    }

    pub fn is_from(&self, instance_id: &InstanceId) -> bool {
        &self.instance_id == instance_id
    }
}

impl<P: Serialize> SyncMessage<P> {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
