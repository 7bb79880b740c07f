//! Ops API Server
//!
//! Serves the REST router with request tracing and a per-request timeout
//! until the shutdown token fires.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::manager::StorageManager;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::rest::RestRouter;

/// HTTP server for the operator endpoints
pub struct ApiServer {
    config: ServerConfig,
    manager: StorageManager,
    shutdown: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ServerConfig, manager: StorageManager, shutdown: CancellationToken) -> Self {
        Self {
            config,
            manager,
            shutdown,
        }
    }

    /// Router with middleware applied
    pub fn router(&self) -> Router {
        RestRouter::new(self.manager.clone())
            .build()
            .layer(TimeoutLayer::new(self.config.request_timeout()))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve until the shutdown token is cancelled
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.bind_addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind API server on {}: {}", addr, e)))?;

        info!("Ops API listening on {}", addr);

        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Ops API shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("API server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
