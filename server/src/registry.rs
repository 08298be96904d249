//! The one place that knows how to reach a connection regardless of
//! which transport it arrived on. `broker_core::RequestProcessor` only
//! ever sees the `ConnectionSink` trait (spec.md §9's "pass a
//! collaborator, not a back-reference" design note); this is its
//! concrete implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::Message as WsMessage;
use broker_core::interfaces::ConnectionSink;
use tokio::sync::{mpsc, Mutex};

use crate::transport::grpc::proto::QueryReply;

pub enum ConnectionHandle {
    WebSocket(mpsc::UnboundedSender<WsMessage>),
    Grpc(mpsc::Sender<QueryReply>),
}

#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    handles: Arc<Mutex<HashMap<u64, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub async fn register(&self, connection_id: u64, handle: ConnectionHandle) {
        self.handles.lock().await.insert(connection_id, handle);
    }

    pub async fn remove(&self, connection_id: u64) {
        self.handles.lock().await.remove(&connection_id);
    }
}

#[async_trait]
impl ConnectionSink for ConnectionRegistry {
    async fn send_to_connection(&self, connection_id: u64, message: String) {
        let handles = self.handles.lock().await;
        match handles.get(&connection_id) {
            Some(ConnectionHandle::WebSocket(tx)) => {
                let _ = tx.send(WsMessage::Text(message));
            }
            Some(ConnectionHandle::Grpc(tx)) => {
                let _ = tx.try_send(QueryReply { body_json: message });
            }
            None => {
                tracing::debug!(connection_id, "dropping message to unknown connection");
            }
        }
    }
}
