//! Plain HTTP transport: a liveness/version probe plus the router
//! assembly shared by the WebSocket upgrade route, following the
//! distribution server's `make_app` pattern (routes built on a single
//! `Router` with one `with_state`).

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::transport::{websocket, AppState};

async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn healthz() -> &'static str {
    "ok"
}

#[must_use]
pub fn make_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(version))
        .route("/version", get(version))
        .route("/healthz", get(healthz))
        .route("/ws", get(websocket::upgrade))
        .with_state(state)
}
