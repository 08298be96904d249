//! gRPC transport: one bidirectional `Query` stream per connection,
//! carrying the same action-protocol JSON envelopes as the WebSocket
//! transport (spec.md §6 — gRPC here is a framing choice, not a second
//! protocol). Streaming plumbing follows the distribution server's
//! `tree_transfer` pattern: an mpsc channel feeding a `ReceiverStream`,
//! with a spawned task forwarding into it so a slow or disconnected
//! client can't stall the request-handling side.

use std::pin::Pin;

use broker_core::channel::{Channel, Transport as ChannelTransport};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status};

use crate::registry::ConnectionHandle;
use crate::transport::AppState;

pub mod proto {
    tonic::include_proto!("broker");
}

use proto::broker_server::{Broker, BrokerServer};
use proto::{QueryReply, QueryRequest};

pub struct GrpcService {
    state: AppState,
}

impl GrpcService {
    #[must_use]
    pub fn new(state: AppState) -> BrokerServer<Self> {
        BrokerServer::new(Self { state })
    }
}

type QueryStream = Pin<Box<dyn Stream<Item = Result<QueryReply, Status>> + Send>>;

#[tonic::async_trait]
impl Broker for GrpcService {
    type QueryStream = QueryStream;

    async fn query(
        &self,
        request: Request<tonic::Streaming<QueryRequest>>,
    ) -> Result<Response<Self::QueryStream>, Status> {
        let connection_id = self.state.next_connection_id();
        let mut inbound = request.into_inner();
        let (reply_tx, reply_rx) = mpsc::channel::<QueryReply>(64);

        self.state
            .registry
            .register(connection_id, ConnectionHandle::Grpc(reply_tx.clone()))
            .await;

        let channel = std::sync::Arc::new(RwLock::new(Channel::new(
            connection_id,
            ChannelTransport::Grpc,
        )));

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(Ok(req)) = inbound.next().await {
                let reply = state
                    .processor
                    .process_query(connection_id, &channel, &req.body_json)
                    .await;
                state.registry.send_to_connection(connection_id, reply).await;
            }
            state.registry.remove(connection_id).await;
            state.processor.forget_connection(connection_id).await;
        });

        let output = ReceiverStream::new(reply_rx).map(Ok);
        Ok(Response::new(Box::pin(output) as Self::QueryStream))
    }
}
