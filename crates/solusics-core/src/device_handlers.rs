// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Device link handlers.
//!
//! Each handler is one user-initiated action: start a connection, reconcile
//! against the gateway, run a quick connection check, or disconnect. None of
//! them retry; the caller re-invokes the action.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::device::{DeviceConnection, DeviceUpdate, GatewayState, LocalStatus};
use crate::display::{self, StatusDisplay};
use crate::error::CoreError;
use crate::gateway::{DeviceGateway, GatewayError, GatewayResponse};
use crate::inflight::InFlightGuard;
use crate::persistence::{DeviceRecord, IntentAction, Persistence, SyncIntentRecord};

/// Shared state for device handlers.
pub struct DeviceHandlerState {
    /// Persistence implementation.
    pub persistence: Arc<dyn Persistence>,
    /// Gateway client.
    pub gateway: Arc<dyn DeviceGateway>,
    /// One reconciliation per tenant at a time.
    pub inflight: InFlightGuard,
}

impl DeviceHandlerState {
    /// Create handler state from a persistence backend and a gateway client.
    pub fn new(persistence: Arc<dyn Persistence>, gateway: Arc<dyn DeviceGateway>) -> Self {
        Self {
            persistence,
            gateway,
            inflight: InFlightGuard::new(),
        }
    }
}

/// Result of a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ConnectOutcome {
    /// The gateway linked the phone immediately.
    Connected {
        device_id: Option<String>,
        connected_at: DateTime<Utc>,
    },
    /// The tenant must scan `qr_code` with the phone.
    AwaitingQr {
        device_id: Option<String>,
        qr_code: String,
    },
    /// The gateway call failed; local status is now `error`.
    Error { message: String },
}

/// Result of reconciling a tenant against the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub tenant_id: String,
    /// `None` when the gateway could not be read.
    pub gateway_state: Option<GatewayState>,
    pub display: StatusDisplay,
    /// Local status after the reconcile.
    pub local_status: LocalStatus,
    pub device_id: Option<String>,
    /// Whether a local write landed. False for no-op, unknown, or stale results.
    pub applied: bool,
}

/// Result of a quick connection check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionCheck {
    pub tenant_id: String,
    /// Raw `status` from the gateway; `None` when unreachable.
    pub gateway_status: Option<String>,
    pub local_status: LocalStatus,
    pub display: StatusDisplay,
}

/// Stored device plus its display tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceView {
    #[serde(flatten)]
    pub device: DeviceConnection,
    pub display: StatusDisplay,
}

// ============================================================================
// Connection Initiator
// ============================================================================

/// Ask the gateway to link `whatsapp_number` and persist what it answers.
///
/// # Errors
///
/// - `ValidationError` when the tenant id or number is empty; nothing is
///   written and the gateway is not called.
/// - `DatabaseError` when the local write fails.
/// - `WriteConflict` when concurrent writers kept the local write from
///   landing; the intent stays open for recovery.
///
/// Gateway failures are not errors: they come back as
/// [`ConnectOutcome::Error`] with the local status set to `error`.
#[instrument(skip(state, whatsapp_number), fields(tenant_id = %tenant_id))]
pub async fn handle_connect(
    state: &DeviceHandlerState,
    tenant_id: &str,
    whatsapp_number: &str,
) -> Result<ConnectOutcome, CoreError> {
    validate_tenant(tenant_id)?;
    let number = whatsapp_number.trim();
    if number.is_empty() {
        return Err(CoreError::validation("whatsapp_number", "must not be empty"));
    }

    let intent = SyncIntentRecord::new(tenant_id, IntentAction::Connect, Some(number));
    state.persistence.record_intent(&intent).await?;

    let response = state
        .gateway
        .start_connection(tenant_id, number)
        .await
        .and_then(GatewayResponse::into_result);

    let (update, outcome) = match response {
        Ok(response) => connect_transition(response),
        Err(e) => {
            warn!(error = %e, "Gateway failed to start connection");
            (
                DeviceUpdate::error(),
                ConnectOutcome::Error {
                    message: e.to_string(),
                },
            )
        }
    };

    write_latest(state, tenant_id, &update.with_whatsapp_number(number)).await?;

    let intent_outcome = match &outcome {
        ConnectOutcome::Error { .. } => "failed",
        _ => "applied",
    };
    state
        .persistence
        .resolve_intent(&intent.intent_id, intent_outcome)
        .await?;

    match &outcome {
        ConnectOutcome::Connected { device_id, .. } => {
            info!(device_id = ?device_id, "Device connected immediately")
        }
        ConnectOutcome::AwaitingQr { device_id, .. } => {
            info!(device_id = ?device_id, "QR challenge issued")
        }
        ConnectOutcome::Error { message } => info!(%message, "Connection attempt failed"),
    }

    Ok(outcome)
}

fn connect_transition(response: GatewayResponse) -> (DeviceUpdate, ConnectOutcome) {
    let device_id = response.reported_device_id();

    if response.status.as_deref() == Some("connected") {
        let now = Utc::now();
        return (
            DeviceUpdate::connected(device_id.clone(), Some(now)),
            ConnectOutcome::Connected {
                device_id,
                connected_at: now,
            },
        );
    }

    match response.qr_code.filter(|qr| !qr.is_empty()) {
        Some(qr_code) => (
            DeviceUpdate::scanning_qr(device_id.clone(), Some(qr_code.clone())),
            ConnectOutcome::AwaitingQr { device_id, qr_code },
        ),
        None => (
            DeviceUpdate::error(),
            ConnectOutcome::Error {
                message: format!(
                    "gateway returned status {:?} without a QR code",
                    response.status
                ),
            },
        ),
    }
}

// ============================================================================
// Status Reconciler
// ============================================================================

/// Fetch the gateway's device state and fold it into the local store.
///
/// `whatsapp_number` falls back to the number stored on the profile.
///
/// # Errors
///
/// - `ValidationError` when the tenant id is empty.
/// - `ReconcileInProgress` when another reconcile for the tenant is running.
/// - `DatabaseError` when reading or writing the local store fails.
///
/// An unreachable gateway is not an error: local state is left alone and the
/// display reports "unknown".
#[instrument(skip(state, whatsapp_number), fields(tenant_id = %tenant_id))]
pub async fn handle_reconcile(
    state: &DeviceHandlerState,
    tenant_id: &str,
    whatsapp_number: Option<&str>,
) -> Result<Reconciliation, CoreError> {
    validate_tenant(tenant_id)?;
    let _permit =
        state
            .inflight
            .try_acquire(tenant_id)
            .ok_or_else(|| CoreError::ReconcileInProgress {
                tenant_id: tenant_id.to_string(),
            })?;

    let current = state
        .persistence
        .get_device(tenant_id)
        .await?
        .unwrap_or_else(|| DeviceRecord::empty(tenant_id, Utc::now()))
        .to_connection()?;

    let number = whatsapp_number
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or_else(|| current.whatsapp_number.clone());

    let (gateway_state, reported_device) = match fetch_gateway_state(
        state,
        tenant_id,
        number.as_deref(),
    )
    .await
    {
        Ok(fetched) => fetched,
        Err(e) => {
            warn!(error = %e, "Gateway status unavailable; local state left as is");
            return Ok(Reconciliation {
                tenant_id: tenant_id.to_string(),
                gateway_state: None,
                display: display::unknown(),
                local_status: current.local_status,
                device_id: current.device_id,
                applied: false,
            });
        }
    };

    let update = reconcile_update(&current, gateway_state, reported_device);
    let wanted_write = update.is_some();
    let written = match update {
        Some(update) => {
            state
                .persistence
                .write_device_state(tenant_id, &update, Some(current.sync_version))
                .await?
        }
        None => None,
    };

    let applied = written.is_some();
    let (local_status, device_id) = match written {
        Some(record) => {
            let connection = record.to_connection()?;
            info!(
                gateway_state = %gateway_state,
                from = %current.local_status,
                to = %connection.local_status,
                "Local device status reconciled"
            );
            (connection.local_status, connection.device_id)
        }
        None => {
            if wanted_write {
                debug!(
                    expected_version = current.sync_version,
                    "Reconcile result dropped; device state changed meanwhile"
                );
            }
            (current.local_status, current.device_id)
        }
    };

    Ok(Reconciliation {
        tenant_id: tenant_id.to_string(),
        gateway_state: Some(gateway_state),
        display: display::for_gateway_state(gateway_state),
        local_status,
        device_id,
        applied,
    })
}

async fn fetch_gateway_state(
    state: &DeviceHandlerState,
    tenant_id: &str,
    whatsapp_number: Option<&str>,
) -> Result<(GatewayState, Option<String>), GatewayError> {
    let response = state
        .gateway
        .device_status(tenant_id, whatsapp_number)
        .await?
        .into_result()?;
    let gateway_state = response.gateway_state()?;
    Ok((gateway_state, response.reported_device_id()))
}

fn update_was_needed(current: &DeviceConnection, gateway_state: GatewayState) -> bool {
    match gateway_state {
        GatewayState::RegisteredConnected => {
            current.local_status != LocalStatus::Connected || current.qr_payload.is_some()
        }
        GatewayState::RegisteredScanningQr => current.local_status != LocalStatus::ScanningQr,
        _ => false,
    }
}

/// The local write implied by a gateway state, if any.
///
/// Only `registered_connected` and `registered_scanning_qr` move local state.
/// Other disagreements are surfaced through the display, not written.
pub fn reconcile_update(
    current: &DeviceConnection,
    gateway_state: GatewayState,
    reported_device: Option<String>,
) -> Option<DeviceUpdate> {
    let device_changed = reported_device
        .as_ref()
        .is_some_and(|d| current.device_id.as_ref() != Some(d));

    match gateway_state {
        GatewayState::RegisteredConnected => {
            if !update_was_needed(current, gateway_state) && !device_changed {
                return None;
            }
            let connected_at = current.connected_at.is_none().then(Utc::now);
            Some(DeviceUpdate::connected(reported_device, connected_at))
        }
        GatewayState::RegisteredScanningQr => {
            if !update_was_needed(current, gateway_state) && !device_changed {
                return None;
            }
            Some(DeviceUpdate::scanning_qr(reported_device, None))
        }
        GatewayState::NotFound
        | GatewayState::RegisteredDisconnected
        | GatewayState::RegisteredError => None,
    }
}

// ============================================================================
// Connection Check
// ============================================================================

/// Quick `check-status` poll used while a QR is displayed.
///
/// Moves local state to `connected` when the gateway says so.
#[instrument(skip(state), fields(tenant_id = %tenant_id))]
pub async fn handle_check_status(
    state: &DeviceHandlerState,
    tenant_id: &str,
) -> Result<ConnectionCheck, CoreError> {
    validate_tenant(tenant_id)?;
    let current = state
        .persistence
        .get_device(tenant_id)
        .await?
        .unwrap_or_else(|| DeviceRecord::empty(tenant_id, Utc::now()))
        .to_connection()?;

    let response = match state
        .gateway
        .check_status(tenant_id)
        .await
        .and_then(GatewayResponse::into_result)
    {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Connection check failed");
            return Ok(ConnectionCheck {
                tenant_id: tenant_id.to_string(),
                gateway_status: None,
                local_status: current.local_status,
                display: display::for_local_status(current.local_status),
            });
        }
    };

    let mut local_status = current.local_status;
    if response.status.as_deref() == Some("connected") {
        if let Some(update) = reconcile_update(
            &current,
            GatewayState::RegisteredConnected,
            response.reported_device_id(),
        ) && let Some(record) = state
            .persistence
            .write_device_state(tenant_id, &update, Some(current.sync_version))
            .await?
        {
            info!("Device confirmed connected by status check");
            local_status = record.to_connection()?.local_status;
        }
    }

    Ok(ConnectionCheck {
        tenant_id: tenant_id.to_string(),
        gateway_status: response.status,
        local_status,
        display: display::for_local_status(local_status),
    })
}

// ============================================================================
// Disconnector
// ============================================================================

/// Tear down the gateway link and clear local device state.
///
/// Returns `false` when the gateway refused or could not be reached; local
/// state is then left untouched. A `WriteConflict` error means the gateway
/// link is gone but the local write did not land; the intent stays open for
/// recovery.
#[instrument(skip(state), fields(tenant_id = %tenant_id))]
pub async fn handle_disconnect(
    state: &DeviceHandlerState,
    tenant_id: &str,
) -> Result<bool, CoreError> {
    validate_tenant(tenant_id)?;

    let intent = SyncIntentRecord::new(tenant_id, IntentAction::Disconnect, None);
    state.persistence.record_intent(&intent).await?;

    let result = state
        .gateway
        .disconnect(tenant_id)
        .await
        .and_then(GatewayResponse::into_result);

    if let Err(e) = result {
        warn!(error = %e, "Gateway refused disconnect");
        state
            .persistence
            .resolve_intent(&intent.intent_id, "failed")
            .await?;
        return Ok(false);
    }

    write_latest(state, tenant_id, &DeviceUpdate::disconnected()).await?;
    state
        .persistence
        .resolve_intent(&intent.intent_id, "applied")
        .await?;

    info!("Device disconnected");
    Ok(true)
}

// ============================================================================
// Shared
// ============================================================================

fn validate_tenant(tenant_id: &str) -> Result<(), CoreError> {
    if tenant_id.trim().is_empty() {
        return Err(CoreError::validation("tenant_id", "must not be empty"));
    }
    Ok(())
}

/// Unconditional device write that must land.
pub(crate) async fn write_latest(
    state: &DeviceHandlerState,
    tenant_id: &str,
    update: &DeviceUpdate,
) -> Result<DeviceRecord, CoreError> {
    state
        .persistence
        .write_device_state(tenant_id, update, None)
        .await?
        .ok_or_else(|| {
            warn!(tenant_id, status = %update.status, "Device write lost to concurrent writers");
            CoreError::WriteConflict {
                tenant_id: tenant_id.to_string(),
            }
        })
}

// ============================================================================
// Queries
// ============================================================================

/// Stored device state for a tenant. Unknown tenants read as unlinked.
pub async fn handle_get_device(
    state: &DeviceHandlerState,
    tenant_id: &str,
) -> Result<DeviceView, CoreError> {
    let device = match state.persistence.get_device(tenant_id).await? {
        Some(record) => record.to_connection()?,
        None => DeviceConnection::unlinked(tenant_id),
    };
    let display = display::for_local_status(device.local_status);
    Ok(DeviceView { device, display })
}
