//! HTTP ingress
//!
//! `POST /jsonrpc` for engine operations and `GET /health`.

pub mod rpc;

pub use rpc::{ObjectAccess, RpcDispatcher, RpcRequest, RpcResponse};

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{GatewaySrvError, Result};

pub fn router(dispatcher: Arc<RpcDispatcher>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/jsonrpc", post(json_rpc))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn json_rpc(State(dispatcher): State<Arc<RpcDispatcher>>, body: Bytes) -> Json<RpcResponse> {
    Json(dispatcher.handle_bytes(&body).await)
}

/// Serve the ingress on `addr` until `cancel` fires
pub async fn serve(
    addr: &str,
    dispatcher: Arc<RpcDispatcher>,
    cancel: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| GatewaySrvError::config(format!("Invalid api.url '{}': {}", addr, e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        GatewaySrvError::io(format!("Failed to bind API listener on {}: {}", addr, e))
    })?;
    info!("JSON-RPC API listening on {}", addr);

    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| GatewaySrvError::io(format!("API server error: {}", e)))
}
