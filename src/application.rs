//! Wires storage, the ingestion pipeline and every listener together.

use crate::api::{self, ApiState};
use crate::core::{Config, LanternError, Result};
use crate::receiver::{spawn_writer, OtelReceiver};
use crate::storage::{self, Storage};
use std::net::SocketAddr;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Owns the configuration and storage for one running backend.
pub struct Application {
    config: Config,
    storage: Storage,
    shutdown: CancellationToken,
}

impl Application {
    /// Opens the configured storage backend.
    pub fn new(config: Config) -> Result<Self> {
        let storage = storage::open(&config.storage)?;
        Ok(Self {
            config,
            storage,
            shutdown: CancellationToken::new(),
        })
    }

    /// Storage shared by the receivers and the query API.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Token that stops every listener when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until Ctrl-C or until a listener fails.
    pub async fn run(self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Received shutdown signal, stopping..."),
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            }
            shutdown.cancel();
        });
        self.serve().await
    }

    /// Serves the receivers and the query API until the shutdown token fires,
    /// then drains the ingestion buffer.
    pub async fn serve(self) -> Result<()> {
        let server = &self.config.server;
        let grpc_addr = SocketAddr::new(server.bind_address, server.grpc_port);
        let http_addr = SocketAddr::new(server.bind_address, server.http_port);
        let query_addr = SocketAddr::new(server.bind_address, server.query_port);

        // The writer outlives the listeners so queued batches still land.
        let writer_token = CancellationToken::new();
        let (queue, writer) =
            spawn_writer(self.storage.clone(), &self.config.ingest, writer_token.clone());
        let receiver = OtelReceiver::new(queue);

        let router = api::create_router(
            ApiState::new(self.storage.clone(), &self.config),
            server.enable_cors,
        );

        tracing::info!("Starting Lantern {}", env!("CARGO_PKG_VERSION"));
        let mut listeners = JoinSet::new();
        listeners.spawn(receiver.clone().serve_grpc(grpc_addr, self.shutdown.clone()));
        listeners.spawn(receiver.serve_http(http_addr, self.shutdown.clone()));
        listeners.spawn(api::start_server(router, query_addr, self.shutdown.clone()));

        let mut first_error = None;
        while let Some(joined) = listeners.join_next().await {
            let outcome = joined.map_err(LanternError::from).and_then(|r| r);
            if let Err(e) = outcome {
                tracing::error!("Listener failed: {}", e);
                self.shutdown.cancel();
                first_error.get_or_insert(e);
            }
        }

        writer_token.cancel();
        if let Err(e) = writer.await {
            tracing::error!("Ingestion writer panicked: {}", e);
        }
        tracing::info!("Lantern stopped");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ConfigBuilder;

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let config = ConfigBuilder::new()
            .grpc_port(39317)
            .http_port(39318)
            .query_port(39686)
            .build()
            .unwrap();
        let app = Application::new(config).unwrap();
        let shutdown = app.shutdown_token();
        let handle = tokio::spawn(app.serve());

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        shutdown.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
