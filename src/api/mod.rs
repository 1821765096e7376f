//! Query HTTP API.
//!
//! Serves the Jaeger query endpoints under `/api` and the Prometheus HTTP API
//! under `/api/v1` from one router, so Jaeger UI and Grafana can both point
//! at the same port.

mod jaeger;
mod prometheus;

use crate::core::config::{Config, QueryConfig};
use crate::core::{LanternError, Result};
use crate::query::QueryEngine;
use crate::storage::Storage;
use axum::{response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub storage: Storage,
    pub engine: Arc<QueryEngine>,
    pub query: QueryConfig,
}

impl ApiState {
    pub fn new(storage: Storage, config: &Config) -> Self {
        let engine = QueryEngine::new(
            Arc::clone(&storage.metric_reader),
            &config.query,
            config.storage.max_series_per_query,
        );
        Self {
            storage,
            engine: Arc::new(engine),
            query: config.query.clone(),
        }
    }
}

/// Token for one request. Cancelled when the handler future is dropped,
/// e.g. because the client went away.
pub(crate) fn request_token() -> (CancellationToken, DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

pub fn create_router(state: ApiState, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .merge(jaeger::routes())
        .merge(prometheus::routes())
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    if enable_cors {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Serves the query API until `shutdown` fires.
pub async fn start_server(router: Router, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        LanternError::network(format!("Failed to bind query API to {}: {}", addr, e))
    })?;
    tracing::info!("Query API listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| LanternError::network(format!("Query API server error: {}", e)))?;

    tracing::info!("Query API stopped");
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
