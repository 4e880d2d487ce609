// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for solusics-server.
//!
//! [`ServerRuntime`] runs the HTTP API together with the QR watcher and the
//! sync intent recovery worker inside an existing tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use solusics_core::{HttpGateway, HttpGatewayConfig, PostgresPersistence};
//! use solusics_server::runtime::ServerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = sqlx::PgPool::connect("postgres://...").await?;
//!     let gateway = HttpGateway::new(HttpGatewayConfig::new("https://proxy.example.com"))?;
//!
//!     let runtime = ServerRuntime::builder()
//!         .persistence(Arc::new(PostgresPersistence::new(pool)))
//!         .gateway(Arc::new(gateway))
//!         .bind_addr("0.0.0.0:8080".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use solusics_core::device_handlers::DeviceHandlerState;
use solusics_core::gateway::DeviceGateway;
use solusics_core::persistence::Persistence;
use solusics_core::qr_watcher::{QrWatcher, QrWatcherConfig};
use solusics_core::sync_recovery::{SyncRecovery, SyncRecoveryConfig};
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::api;

/// Builder for creating a [`ServerRuntime`].
pub struct ServerRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    gateway: Option<Arc<dyn DeviceGateway>>,
    bind_addr: SocketAddr,
    qr_watcher: QrWatcherConfig,
    sync_recovery: SyncRecoveryConfig,
}

impl Default for ServerRuntimeBuilder {
    fn default() -> Self {
        Self {
            persistence: None,
            gateway: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            qr_watcher: QrWatcherConfig::default(),
            sync_recovery: SyncRecoveryConfig::default(),
        }
    }
}

impl ServerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence backend (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the gateway client (required).
    pub fn gateway(mut self, gateway: Arc<dyn DeviceGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set the bind address for the HTTP API.
    ///
    /// Default: `0.0.0.0:8080`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the QR watcher configuration.
    pub fn qr_watcher(mut self, config: QrWatcherConfig) -> Self {
        self.qr_watcher = config;
        self
    }

    /// Set the sync recovery configuration.
    pub fn sync_recovery(mut self, config: SyncRecoveryConfig) -> Self {
        self.sync_recovery = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ServerRuntimeConfig> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;
        let gateway = self
            .gateway
            .ok_or_else(|| anyhow::anyhow!("gateway is required"))?;

        Ok(ServerRuntimeConfig {
            persistence,
            gateway,
            bind_addr: self.bind_addr,
            qr_watcher: self.qr_watcher,
            sync_recovery: self.sync_recovery,
        })
    }
}

/// Configuration for a [`ServerRuntime`].
pub struct ServerRuntimeConfig {
    persistence: Arc<dyn Persistence>,
    gateway: Arc<dyn DeviceGateway>,
    bind_addr: SocketAddr,
    qr_watcher: QrWatcherConfig,
    sync_recovery: SyncRecoveryConfig,
}

impl ServerRuntimeConfig {
    /// Start the runtime, spawning the HTTP server and worker tasks.
    pub async fn start(self) -> Result<ServerRuntime> {
        let state = Arc::new(DeviceHandlerState::new(
            self.persistence.clone(),
            self.gateway.clone(),
        ));

        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let qr_watcher = QrWatcher::new(state.clone(), self.qr_watcher);
        let qr_watcher_shutdown = qr_watcher.shutdown_handle();
        let qr_watcher_handle = tokio::spawn(async move {
            qr_watcher.run().await;
        });

        let recovery = SyncRecovery::new(state.clone(), self.sync_recovery);
        let recovery_shutdown = recovery.shutdown_handle();
        let recovery_handle = tokio::spawn(async move {
            recovery.run().await;
        });

        let (server_shutdown_tx, server_shutdown_rx) = watch::channel(false);
        let server_handle = tokio::spawn(run_http_server(
            listener,
            api::router(state.clone()),
            server_shutdown_rx,
        ));

        info!(
            bind_addr = %local_addr,
            gateway_type = self.gateway.gateway_type(),
            "ServerRuntime started"
        );

        Ok(ServerRuntime {
            server_handle,
            qr_watcher_handle,
            recovery_handle,
            server_shutdown_tx,
            qr_watcher_shutdown,
            recovery_shutdown,
            state,
            local_addr,
        })
    }
}

/// A running solusics server that can be embedded in an application.
///
/// The runtime manages:
/// - HTTP API for the connection panel
/// - QR watcher for tenants awaiting a scan
/// - Sync recovery for abandoned connect and disconnect intents
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ServerRuntime {
    server_handle: JoinHandle<Result<()>>,
    qr_watcher_handle: JoinHandle<()>,
    recovery_handle: JoinHandle<()>,
    server_shutdown_tx: watch::Sender<bool>,
    qr_watcher_shutdown: Arc<Notify>,
    recovery_shutdown: Arc<Notify>,
    state: Arc<DeviceHandlerState>,
    local_addr: SocketAddr,
}

impl ServerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ServerRuntimeBuilder {
        ServerRuntimeBuilder::new()
    }

    /// Address the HTTP server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a reference to the shared handler state.
    pub fn state(&self) -> &Arc<DeviceHandlerState> {
        &self.state
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals the HTTP server and both workers, then waits for them.
    pub async fn shutdown(self) -> Result<()> {
        info!("ServerRuntime shutting down...");

        let _ = self.server_shutdown_tx.send(true);
        self.qr_watcher_shutdown.notify_one();
        self.recovery_shutdown.notify_one();

        if let Err(e) = self.qr_watcher_handle.await {
            error!("QR watcher task panicked: {}", e);
        }

        if let Err(e) = self.recovery_handle.await {
            error!("Sync recovery task panicked: {}", e);
        }

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("ServerRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("HTTP server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("HTTP server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
            && !self.qr_watcher_handle.is_finished()
            && !self.recovery_handle.is_finished()
    }
}

async fn run_http_server(
    listener: TcpListener,
    app: axum::Router,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "HTTP server starting");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while shutdown_rx.changed().await.is_ok() {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            info!("HTTP server received shutdown signal");
        })
        .await?;

    Ok(())
}
