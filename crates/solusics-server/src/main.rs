// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Solusics Server - WhatsApp device link API
//!
//! An HTTP server responsible for:
//! - Starting device connections and serving QR challenges
//! - Reconciling local device state with the messaging gateway
//! - Disconnecting devices
//! - Expiring unscanned QR codes and recovering interrupted syncs

use std::sync::Arc;
use tracing::{info, warn};

use solusics_core::gateway::{HttpGateway, HttpGatewayConfig};
use solusics_core::qr_watcher::QrWatcherConfig;
use solusics_core::sync_recovery::SyncRecoveryConfig;
use solusics_server::config::Config;
use solusics_server::database;
use solusics_server::runtime::ServerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "solusics_server=info,solusics_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        backend = ?config.database_backend,
        gateway_url = %config.gateway_url,
        "Starting Solusics Server"
    );

    let persistence = database::connect(config.database_backend, &config.database_url).await?;

    let gateway = HttpGateway::new(HttpGatewayConfig {
        url: config.gateway_url.clone(),
        token: config.gateway_token.clone(),
        timeout: config.gateway_timeout,
    })?;
    info!(url = gateway.url(), "Gateway client initialized");

    let runtime = ServerRuntime::builder()
        .persistence(persistence)
        .gateway(Arc::new(gateway))
        .bind_addr(config.http_addr)
        .qr_watcher(QrWatcherConfig {
            poll_interval: config.qr_poll_interval,
            qr_lifetime: config.qr_lifetime,
            ..Default::default()
        })
        .sync_recovery(SyncRecoveryConfig {
            poll_interval: config.recovery_interval,
            threshold: config.recovery_threshold,
            ..Default::default()
        })
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Solusics server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("Solusics server shut down");

    Ok(())
}
