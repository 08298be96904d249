//! Collaborator interfaces the core hands to its caller instead of
//! holding a direct reference back into the transport layer (spec.md §9:
//! avoid the original server's object graph of mutual `Tree`/`Server`
//! references by passing collaborators as trait objects keyed by
//! connection id).

use async_trait::async_trait;

use crate::path::PathAddress;
use crate::tree::node::Attribute;
use crate::tree::RenderedDataPoint;

/// Forwards signal changes to an external publish-subscribe bus (MQTT in
/// the original system). Out of scope for this crate's own transports
/// (spec.md §1 Non-goals); a [`NoopPublisher`] is the default.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn send_path_value(
        &self,
        path: &PathAddress,
        attribute: Attribute,
        datapoint: &RenderedDataPoint,
    );
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn send_path_value(
        &self,
        _path: &PathAddress,
        _attribute: Attribute,
        _datapoint: &RenderedDataPoint,
    ) {
    }
}

/// The processor's view of the connection registry: deliver a raw wire
/// message to one connection by id. Transports implement this over
/// whatever socket type they actually hold.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    async fn send_to_connection(&self, connection_id: u64, message: String);
}
