//! Cross-instance replication over the store's pub/sub channels.
//!
//! Publishers serialize a [`SyncMessage`] and publish it through a
//! [`BackingHandle`](crate::store::BackingHandle). Each subscribed channel
//! has one background task, started with [`spawn_listener`], that decodes
//! incoming messages and hands them to a [`SyncHandler`]. Delivery is
//! at-least-once at best; handlers must be idempotent.

mod listener;
mod message;

pub use listener::{Dispatch, SyncHandler, dispatch, spawn_listener};
pub use message::{CACHE_INVALIDATE, CIRCUIT_UPDATE, InstanceId, SyncMessage};
