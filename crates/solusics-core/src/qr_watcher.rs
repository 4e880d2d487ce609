// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QR watcher.
//!
//! Periodically reconciles every tenant with an outstanding QR challenge so
//! the local status flips to `connected` as soon as the phone is linked, and
//! expires QR codes that were never scanned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::device::{DeviceUpdate, LocalStatus};
use crate::device_handlers::{DeviceHandlerState, handle_reconcile};
use crate::error::CoreError;
use crate::persistence::DeviceRecord;

/// QR watcher configuration.
#[derive(Debug, Clone)]
pub struct QrWatcherConfig {
    /// How often to poll scanning tenants
    pub poll_interval: Duration,
    /// How long a QR code stays valid
    pub qr_lifetime: Duration,
    /// Maximum tenants to process per poll
    pub batch_size: i64,
}

impl Default for QrWatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            qr_lifetime: Duration::from_secs(120),
            batch_size: 50,
        }
    }
}

/// Counters for one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QrWatchStats {
    /// Tenants whose local state changed after reconciling.
    pub reconciled: u64,
    /// Tenants skipped because a reconcile was already in flight.
    pub busy: u64,
    /// QR codes expired.
    pub expired: u64,
    /// Tenants that failed with a store error.
    pub errors: u64,
}

/// QR watcher that runs as a background task.
pub struct QrWatcher {
    state: Arc<DeviceHandlerState>,
    config: QrWatcherConfig,
    shutdown: Arc<Notify>,
}

impl QrWatcher {
    /// Create a new QR watcher.
    pub fn new(state: Arc<DeviceHandlerState>, config: QrWatcherConfig) -> Self {
        Self {
            state,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the watcher loop.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            qr_lifetime_secs = self.config.qr_lifetime.as_secs(),
            batch_size = self.config.batch_size,
            "QR watcher started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("QR watcher shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "Failed to poll scanning devices");
                    }
                }
            }
        }
    }

    /// Process one batch of scanning tenants.
    pub async fn poll_once(&self) -> Result<QrWatchStats, CoreError> {
        let devices = self
            .state
            .persistence
            .list_devices_by_status(LocalStatus::ScanningQr, self.config.batch_size)
            .await?;

        let mut stats = QrWatchStats::default();
        if devices.is_empty() {
            debug!("No devices awaiting QR scan");
            return Ok(stats);
        }

        debug!(count = devices.len(), "Polling devices awaiting QR scan");

        for device in devices {
            if let Err(e) = self.watch_device(&device, &mut stats).await {
                stats.errors += 1;
                error!(
                    tenant_id = %device.tenant_id,
                    error = %e,
                    "Failed to process scanning device"
                );
                // Continue with the rest of the batch
            }
        }

        Ok(stats)
    }

    async fn watch_device(
        &self,
        record: &DeviceRecord,
        stats: &mut QrWatchStats,
    ) -> Result<(), CoreError> {
        let connection = record.to_connection()?;

        let still_scanning = match handle_reconcile(&self.state, &record.tenant_id, None).await {
            Ok(reconciliation) => {
                if reconciliation.applied {
                    stats.reconciled += 1;
                }
                reconciliation.local_status == LocalStatus::ScanningQr
            }
            Err(CoreError::ReconcileInProgress { .. }) => {
                stats.busy += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let lifetime = chrono::Duration::from_std(self.config.qr_lifetime)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        if still_scanning && connection.qr_expired(Utc::now(), lifetime) {
            let written = self
                .state
                .persistence
                .write_device_state(
                    &record.tenant_id,
                    &DeviceUpdate::expired(),
                    Some(connection.sync_version),
                )
                .await?;
            if written.is_some() {
                stats.expired += 1;
                warn!(tenant_id = %record.tenant_id, "QR code expired without being scanned");
            }
        }

        Ok(())
    }
}
