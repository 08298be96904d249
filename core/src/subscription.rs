//! Subscriptions: a single dispatcher task fans signal-change events out
//! to per-subscription bounded queues, re-checking access at delivery
//! time so a revoked or expired token stops deliveries immediately
//! (spec.md §4.5).
//!
//! Deliveries across different subscriptions carry no ordering
//! guarantee; within one subscription, delivery is FIFO. A subscriber
//! that falls behind has its queue capped — a full queue drops the
//! newest update for that subscriber rather than blocking the
//! dispatcher, so one slow client can't stall delivery to everyone else.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::access::AccessChecker;
use crate::channel::Channel;
use crate::error::SubscriptionError;
use crate::path::PathAddress;
use crate::tree::node::Attribute;
use crate::tree::RenderedDataPoint;

const NOTIFICATION_QUEUE_CAPACITY: usize = 64;
const CHANGE_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct SubscriptionNotification {
    pub subscription_id: Uuid,
    pub path: PathAddress,
    pub attribute: Attribute,
    pub datapoint: RenderedDataPoint,
}

struct ChangeEvent {
    path: PathAddress,
    attribute: Attribute,
    datapoint: RenderedDataPoint,
}

struct Subscription {
    channel_id: u64,
    channel: Arc<RwLock<Channel>>,
    path: PathAddress,
    attribute: Attribute,
    sender: mpsc::Sender<SubscriptionNotification>,
}

#[derive(Default)]
struct Registry {
    subscriptions: HashMap<Uuid, Subscription>,
}

/// Handle shared by every connection to register subscriptions and push
/// signal changes.
#[derive(Clone)]
pub struct SubscriptionEngine {
    registry: Arc<Mutex<Registry>>,
    change_tx: mpsc::Sender<ChangeEvent>,
}

impl SubscriptionEngine {
    /// Construct the engine and spawn its dispatcher task.
    #[must_use]
    pub fn spawn() -> Self {
        let registry = Arc::new(Mutex::new(Registry::default()));
        let (change_tx, mut change_rx) = mpsc::channel::<ChangeEvent>(CHANGE_QUEUE_CAPACITY);
        let dispatcher_registry = registry.clone();

        tokio::spawn(async move {
            while let Some(event) = change_rx.recv().await {
                let matching: Vec<(Uuid, Arc<RwLock<Channel>>, mpsc::Sender<SubscriptionNotification>)> = {
                    let reg = dispatcher_registry.lock().await;
                    reg.subscriptions
                        .iter()
                        .filter(|(_, s)| s.attribute == event.attribute && s.path == event.path)
                        .map(|(id, s)| (*id, s.channel.clone(), s.sender.clone()))
                        .collect()
                };

                for (subscription_id, channel, sender) in matching {
                    let channel_guard = channel.read().await;
                    if AccessChecker::check_read(&channel_guard, &event.path).is_err() {
                        continue;
                    }
                    drop(channel_guard);
                    let notification = SubscriptionNotification {
                        subscription_id,
                        path: event.path.clone(),
                        attribute: event.attribute,
                        datapoint: event.datapoint.clone(),
                    };
                    let _ = sender.try_send(notification);
                }
            }
        });

        Self {
            registry,
            change_tx,
        }
    }

    /// Register a new subscription, returning its fresh v4 random id
    /// (spec.md §4.5 step 4) and the receiving end of its notification
    /// queue. Each call allocates a distinct id, even for an identical
    /// (channel, path, attribute) triple already registered.
    pub async fn subscribe(
        &self,
        channel_id: u64,
        channel: Arc<RwLock<Channel>>,
        path: PathAddress,
        attribute: Attribute,
    ) -> (Uuid, mpsc::Receiver<SubscriptionNotification>) {
        let (sender, receiver) = mpsc::channel(NOTIFICATION_QUEUE_CAPACITY);
        let id = Uuid::new_v4();
        let mut reg = self.registry.lock().await;
        reg.subscriptions.insert(
            id,
            Subscription {
                channel_id,
                channel,
                path,
                attribute,
                sender,
            },
        );
        (id, receiver)
    }

    pub async fn unsubscribe(&self, subscription_id: Uuid) -> Result<(), SubscriptionError> {
        let mut reg = self.registry.lock().await;
        reg.subscriptions
            .remove(&subscription_id)
            .map(|_| ())
            .ok_or(SubscriptionError::NotFound)
    }

    /// Drop every subscription belonging to a connection, e.g. on
    /// disconnect.
    pub async fn unsubscribe_all(&self, channel_id: u64) {
        let mut reg = self.registry.lock().await;
        reg.subscriptions.retain(|_, s| s.channel_id != channel_id);
    }

    /// Notify the dispatcher that a signal changed. Backpressures the
    /// caller (a `set`) if the dispatcher is badly behind; this queue is
    /// sized generously since it fans into many subscriber queues rather
    /// than being read directly by a client.
    pub async fn publish_change(
        &self,
        path: PathAddress,
        attribute: Attribute,
        datapoint: RenderedDataPoint,
    ) {
        let _ = self
            .change_tx
            .send(ChangeEvent {
                path,
                attribute,
                datapoint,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Permission, Transport};
    use serde_json::json;

    fn datapoint() -> RenderedDataPoint {
        RenderedDataPoint {
            ts: chrono::Utc::now(),
            value: json!(42.0),
        }
    }

    fn authorized_channel(path: &str) -> Arc<RwLock<Channel>> {
        let mut channel = Channel::new(1, Transport::Ws);
        channel.authorized = true;
        channel.token_expiry = Some(chrono::Utc::now() + chrono::Duration::hours(1));
        channel.scope.insert(path.to_owned(), Permission::parse("r"));
        Arc::new(RwLock::new(channel))
    }

    #[tokio::test]
    async fn subscriber_receives_matching_change() {
        let engine = SubscriptionEngine::spawn();
        let path = PathAddress::from_dotted("Vehicle.Speed").unwrap();
        let channel = authorized_channel("Vehicle.Speed");
        let (_, mut rx) = engine
            .subscribe(1, channel, path.clone(), Attribute::Value)
            .await;

        engine
            .publish_change(path, Attribute::Value, datapoint())
            .await;

        let notification = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("did not time out")
            .expect("channel not closed");
        assert_eq!(notification.datapoint.value, json!(42.0));
    }

    #[tokio::test]
    async fn revoked_access_suppresses_delivery() {
        let engine = SubscriptionEngine::spawn();
        let path = PathAddress::from_dotted("Vehicle.Speed").unwrap();
        let channel = authorized_channel("Vehicle.Speed");
        let (_, mut rx) = engine
            .subscribe(1, channel.clone(), path.clone(), Attribute::Value)
            .await;
        channel.write().await.revoke();

        engine
            .publish_change(path, Attribute::Value, datapoint())
            .await;

        let result = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await;
        assert!(result.is_err(), "expected no delivery after revocation");
    }

    #[tokio::test]
    async fn unsubscribe_all_drops_connections_subscriptions() {
        let engine = SubscriptionEngine::spawn();
        let path = PathAddress::from_dotted("Vehicle.Speed").unwrap();
        let channel = authorized_channel("Vehicle.Speed");
        let (id, _rx) = engine
            .subscribe(7, channel, path, Attribute::Value)
            .await;
        engine.unsubscribe_all(7).await;
        assert!(matches!(
            engine.unsubscribe(id).await.unwrap_err(),
            SubscriptionError::NotFound
        ));
    }
}
