//! WebSocket transport: one socket per connection, upgraded via axum's
//! `ws` feature. Every reply — whether a direct request/response or an
//! async subscription push — goes out through the same registered
//! `ConnectionHandle`, so ordering on the wire matches send order.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use broker_core::channel::{Channel, Transport as ChannelTransport};
use broker_core::interfaces::ConnectionSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};

use crate::registry::ConnectionHandle;
use crate::transport::AppState;

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = state.next_connection_id();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    state
        .registry
        .register(connection_id, ConnectionHandle::WebSocket(out_tx))
        .await;

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    let channel = std::sync::Arc::new(RwLock::new(Channel::new(
        connection_id,
        ChannelTransport::Ws,
    )));

    while let Some(Ok(message)) = ws_rx.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let reply = state
            .processor
            .process_query(connection_id, &channel, &text)
            .await;
        state
            .registry
            .send_to_connection(connection_id, reply)
            .await;
    }

    state.registry.remove(connection_id).await;
    state.processor.forget_connection(connection_id).await;
    writer.abort();
}
