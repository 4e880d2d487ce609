// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sync intent recovery.
//!
//! Connect and disconnect write an intent before calling the gateway and
//! resolve it after the local write. An intent that stays unresolved past the
//! threshold means the process died in between; this worker re-reads gateway
//! truth and converges the local row.
//!
//! | Intent | Gateway reports | Local action |
//! |--------|-----------------|--------------|
//! | connect | anything | reconcile |
//! | disconnect | `not_found`, `registered_disconnected` | clear device fields |
//! | disconnect | anything else | reconcile |
//!
//! A QR payload returned by a crashed connect is lost; the tenant requests a
//! new one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::device::{DeviceUpdate, GatewayState};
use crate::device_handlers::{DeviceHandlerState, handle_reconcile, write_latest};
use crate::error::CoreError;
use crate::gateway::GatewayResponse;
use crate::persistence::{IntentAction, SyncIntentRecord};

/// Outcome written to intents closed by this worker.
pub const RECOVERED: &str = "recovered";

/// Sync recovery configuration.
#[derive(Debug, Clone)]
pub struct SyncRecoveryConfig {
    /// How often to look for stale intents
    pub poll_interval: Duration,
    /// Age after which an unresolved intent is considered abandoned.
    /// Keep this above the gateway timeout.
    pub threshold: Duration,
    /// Maximum intents to process per poll
    pub batch_size: i64,
}

impl Default for SyncRecoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            threshold: Duration::from_secs(60),
            batch_size: 20,
        }
    }
}

/// Counters for one recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Intents resolved.
    pub recovered: u64,
    /// Intents left for the next pass (gateway down or tenant busy).
    pub deferred: u64,
    /// Intents that failed with a store error.
    pub errors: u64,
}

/// Sync recovery worker that runs as a background task.
pub struct SyncRecovery {
    state: Arc<DeviceHandlerState>,
    config: SyncRecoveryConfig,
    shutdown: Arc<Notify>,
}

impl SyncRecovery {
    /// Create a new recovery worker.
    pub fn new(state: Arc<DeviceHandlerState>, config: SyncRecoveryConfig) -> Self {
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

    /// Run the recovery loop.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            threshold_secs = self.config.threshold.as_secs(),
            "Sync recovery started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Sync recovery shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.recover_once().await {
                        error!(error = %e, "Failed to recover sync intents");
                    }
                }
            }
        }
    }

    /// Process one batch of abandoned intents.
    pub async fn recover_once(&self) -> Result<RecoveryStats, CoreError> {
        let threshold = chrono::Duration::from_std(self.config.threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let intents = self
            .state
            .persistence
            .list_unresolved_intents(Utc::now() - threshold, self.config.batch_size)
            .await?;

        let mut stats = RecoveryStats::default();
        if intents.is_empty() {
            debug!("No abandoned sync intents");
            return Ok(stats);
        }

        info!(count = intents.len(), "Recovering abandoned sync intents");

        for intent in intents {
            match self.recover_intent(&intent).await {
                Ok(true) => stats.recovered += 1,
                Ok(false) => stats.deferred += 1,
                Err(e) => {
                    stats.errors += 1;
                    error!(
                        intent_id = %intent.intent_id,
                        tenant_id = %intent.tenant_id,
                        error = %e,
                        "Failed to recover sync intent"
                    );
                }
            }
        }

        Ok(stats)
    }

    /// Converge one intent. Returns `false` when it should be retried later.
    async fn recover_intent(&self, intent: &SyncIntentRecord) -> Result<bool, CoreError> {
        let converged = match intent.intent_action()? {
            IntentAction::Connect => {
                self.reconcile(intent, intent.whatsapp_number.as_deref())
                    .await?
            }
            IntentAction::Disconnect => self.recover_disconnect(intent).await?,
        };

        if converged {
            self.state
                .persistence
                .resolve_intent(&intent.intent_id, RECOVERED)
                .await?;
            info!(
                intent_id = %intent.intent_id,
                tenant_id = %intent.tenant_id,
                action = %intent.action,
                "Sync intent recovered"
            );
        }

        Ok(converged)
    }

    async fn recover_disconnect(&self, intent: &SyncIntentRecord) -> Result<bool, CoreError> {
        let number = self.lookup_number(intent).await?;
        let gateway_state = self
            .state
            .gateway
            .device_status(&intent.tenant_id, number.as_deref())
            .await
            .and_then(GatewayResponse::into_result)
            .and_then(|response| response.gateway_state());

        match gateway_state {
            Ok(GatewayState::NotFound | GatewayState::RegisteredDisconnected) => {
                write_latest(&self.state, &intent.tenant_id, &DeviceUpdate::disconnected())
                    .await?;
                Ok(true)
            }
            Ok(_) => self.reconcile(intent, number.as_deref()).await,
            Err(e) => {
                warn!(
                    tenant_id = %intent.tenant_id,
                    error = %e,
                    "Gateway unavailable; disconnect recovery deferred"
                );
                Ok(false)
            }
        }
    }

    /// Number the gateway knows the device by: the intent's, else the stored one.
    async fn lookup_number(&self, intent: &SyncIntentRecord) -> Result<Option<String>, CoreError> {
        if intent.whatsapp_number.is_some() {
            return Ok(intent.whatsapp_number.clone());
        }
        Ok(self
            .state
            .persistence
            .get_device(&intent.tenant_id)
            .await?
            .and_then(|record| record.whatsapp_number))
    }

    async fn reconcile(
        &self,
        intent: &SyncIntentRecord,
        whatsapp_number: Option<&str>,
    ) -> Result<bool, CoreError> {
        match handle_reconcile(&self.state, &intent.tenant_id, whatsapp_number).await {
            Ok(reconciliation) => Ok(reconciliation.gateway_state.is_some()),
            Err(CoreError::ReconcileInProgress { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
