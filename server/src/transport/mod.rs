//! The three transports share one `RequestProcessor` and one
//! `ConnectionRegistry`; each only differs in how it gets bytes on and
//! off the wire.

pub mod grpc;
pub mod http;
pub mod websocket;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use broker_core::processor::RequestProcessor;

use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<RequestProcessor>,
    pub registry: ConnectionRegistry,
    next_connection_id: Arc<AtomicU64>,
}

impl AppState {
    #[must_use]
    pub fn new(processor: Arc<RequestProcessor>, registry: ConnectionRegistry) -> Self {
        Self {
            processor,
            registry,
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }
}
