//! Background tasks that own subscriber connections.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::store::{ConnectionManager, Namespace};
use crate::sync::{InstanceId, SyncMessage};

/// Receiver side of a sync channel.
///
/// Implementors only touch local state; the listener does all network I/O.
pub trait SyncHandler: Send + Sync + 'static {
    type Payload: DeserializeOwned + Send;

    fn channel(&self) -> String;

    fn action(&self) -> &'static str;

    fn instance_id(&self) -> &InstanceId;

    /// Apply a message that came from another instance.
    fn apply(&self, message: SyncMessage<Self::Payload>);
}

/// What happened to one raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Applied,
    OwnMessage,
    WrongAction,
    Malformed,
}

/// Decode `raw` and hand it to `handler` unless it is ours.
pub fn dispatch<H: SyncHandler + ?Sized>(handler: &H, raw: &str) -> Dispatch {
    let message: SyncMessage<H::Payload> = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(e) => {
            warn!(channel = %handler.channel(), error = %e, "Dropping malformed sync message");
            return Dispatch::Malformed;
        }
    };

    if message.is_from(handler.instance_id()) {
        return Dispatch::OwnMessage;
    }
    if message.action != handler.action() {
        debug!(channel = %handler.channel(), action = %message.action, "Ignoring unexpected action");
        return Dispatch::WrongAction;
    }

    handler.apply(message);
    Dispatch::Applied
}

/// Subscribe `handler` to its channel until the manager shuts down.
///
/// A lost subscription is re-established after `resubscribe_delay_ms` plus
/// jitter. While the store is unreachable the task just waits.
pub fn spawn_listener<H: SyncHandler>(
    connections: Arc<ConnectionManager>,
    namespace: Namespace,
    handler: Arc<H>,
    config: SyncConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let shutdown = connections.shutdown_token();
        let channel = handler.channel();
        let subscribe_timeout = connections.config().connect_timeout();

        while !shutdown.is_cancelled() {
            if let Some(mut subscriber) = connections.create_subscriber(namespace, &channel).await {
                match tokio::time::timeout(subscribe_timeout, subscriber.subscribe(&channel)).await {
                    Ok(Ok(())) => {
                        info!(namespace, channel = %channel, "Listening for sync messages");
                        let cancel = subscriber.cancel_token();
                        let mut stream = Box::pin(subscriber.into_pubsub().into_on_message());

                        loop {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                next = stream.next() => match next {
                                    Some(msg) => match msg.get_payload::<String>() {
                                        Ok(raw) => {
                                            dispatch(handler.as_ref(), &raw);
                                        }
                                        Err(e) => warn!(channel = %channel, error = %e, "Unreadable sync payload"),
                                    },
                                    None => {
                                        warn!(namespace, channel = %channel, "Subscription lost");
                                        break;
                                    }
                                },
                            }
                        }
                    }
                    Ok(Err(e)) => warn!(namespace, channel = %channel, error = %e, "Subscribe failed"),
                    Err(_) => warn!(namespace, channel = %channel, "Subscribe timed out"),
                }
            } else {
                debug!(namespace, channel = %channel, "No subscriber available, sync paused");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(resubscribe_delay(&config)) => {}
            }
        }

        info!(namespace, channel = %channel, "Sync listener stopped");
    })
}

fn resubscribe_delay(config: &SyncConfig) -> Duration {
    let jitter = if config.resubscribe_jitter_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=config.resubscribe_jitter_ms)
    };
    Duration::from_millis(config.resubscribe_delay_ms.saturating_add(jitter))
}
