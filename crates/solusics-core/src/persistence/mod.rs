// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for solusics-core.
//!
//! Device state lives on the tenant's `business_profiles` row. Every write
//! bumps `sync_version`, which callers can pass back as the expected version
//! to make a write conditional. Sync intents are a small write-ahead log of
//! gateway calls whose local write has not landed yet.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::device::{DeviceConnection, DeviceUpdate, LocalStatus};
use crate::error::CoreError;

/// Read-apply-update attempts for an unconditional device write.
pub const WRITE_ATTEMPTS: usize = 5;

/// Device columns of a business profile row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DeviceRecord {
    /// Owning tenant.
    pub tenant_id: String,
    /// Phone number last used to connect.
    pub whatsapp_number: Option<String>,
    /// Gateway device identifier.
    pub fonnte_device_id: Option<String>,
    /// Local status (disconnected, scanning_qr, connected, error, expired).
    pub fonnte_status: String,
    /// Base64 QR image while scanning.
    pub fonnte_qr_code_url: Option<String>,
    /// When the current QR was issued.
    pub fonnte_qr_generated_at: Option<DateTime<Utc>>,
    /// When the gateway first confirmed the link.
    pub fonnte_connected_at: Option<DateTime<Utc>>,
    /// Per-device API token handed out by the gateway.
    pub fonnte_device_token: Option<String>,
    /// Version token, bumped on every write.
    pub sync_version: i64,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// Row for a tenant that has never connected.
    pub fn empty(tenant_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            whatsapp_number: None,
            fonnte_device_id: None,
            fonnte_status: LocalStatus::Disconnected.as_str().to_string(),
            fonnte_qr_code_url: None,
            fonnte_qr_generated_at: None,
            fonnte_connected_at: None,
            fonnte_device_token: None,
            sync_version: 0,
            updated_at: now,
        }
    }

    /// Compute the row that results from applying `update` at `now`.
    ///
    /// The returned record carries the next `sync_version`.
    pub fn apply(&self, update: &DeviceUpdate, now: DateTime<Utc>) -> Self {
        let update = update.clone();
        let issues_qr = update.issues_qr();
        let qr = update.qr_payload.apply(self.fonnte_qr_code_url.clone());
        let was_scanning = self.fonnte_status == LocalStatus::ScanningQr.as_str();
        // The issue time marks when the current scan window opened, with or
        // without a payload, so every scanning row can expire.
        let qr_generated_at = if update.status != LocalStatus::ScanningQr {
            None
        } else if issues_qr || !was_scanning {
            Some(now)
        } else {
            self.fonnte_qr_generated_at.or(Some(now))
        };

        Self {
            tenant_id: self.tenant_id.clone(),
            whatsapp_number: update.whatsapp_number.apply(self.whatsapp_number.clone()),
            fonnte_device_id: update.device_id.apply(self.fonnte_device_id.clone()),
            fonnte_status: update.status.as_str().to_string(),
            fonnte_qr_code_url: qr,
            fonnte_qr_generated_at: qr_generated_at,
            fonnte_connected_at: update.connected_at.apply(self.fonnte_connected_at),
            fonnte_device_token: if update.clear_device_token {
                None
            } else {
                self.fonnte_device_token.clone()
            },
            sync_version: self.sync_version + 1,
            updated_at: now,
        }
    }

    /// Parse into the domain type.
    pub fn to_connection(&self) -> Result<DeviceConnection, CoreError> {
        let local_status =
            self.fonnte_status
                .parse::<LocalStatus>()
                .map_err(|e| CoreError::DatabaseError {
                    operation: "decode_device".to_string(),
                    details: e.to_string(),
                })?;

        Ok(DeviceConnection {
            tenant_id: self.tenant_id.clone(),
            device_id: self.fonnte_device_id.clone(),
            local_status,
            qr_payload: self.fonnte_qr_code_url.clone(),
            qr_generated_at: self.fonnte_qr_generated_at,
            connected_at: self.fonnte_connected_at,
            whatsapp_number: self.whatsapp_number.clone(),
            sync_version: self.sync_version,
            updated_at: self.updated_at,
        })
    }
}

/// Gateway action recorded ahead of a local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentAction {
    Connect,
    Disconnect,
}

impl IntentAction {
    /// Database spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
        }
    }
}

impl std::str::FromStr for IntentAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect" => Ok(Self::Connect),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(CoreError::DatabaseError {
                operation: "decode_intent".to_string(),
                details: format!("unknown intent action '{}'", other),
            }),
        }
    }
}

/// Sync intent record from the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SyncIntentRecord {
    /// UUID of the intent.
    pub intent_id: String,
    /// Tenant the call was made for.
    pub tenant_id: String,
    /// `connect` or `disconnect`.
    pub action: String,
    /// Phone number used for the call, if any.
    pub whatsapp_number: Option<String>,
    /// When the intent was written (before the gateway call).
    pub created_at: DateTime<Utc>,
    /// When the local write completed.
    pub resolved_at: Option<DateTime<Utc>>,
    /// How the intent ended (applied, failed, recovered...).
    pub outcome: Option<String>,
}

impl SyncIntentRecord {
    /// New unresolved intent.
    pub fn new(tenant_id: &str, action: IntentAction, whatsapp_number: Option<&str>) -> Self {
        Self {
            intent_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            action: action.as_str().to_string(),
            whatsapp_number: whatsapp_number.map(str::to_string),
            created_at: Utc::now(),
            resolved_at: None,
            outcome: None,
        }
    }

    /// Parsed action.
    pub fn intent_action(&self) -> Result<IntentAction, CoreError> {
        self.action.parse()
    }
}

/// Persistence interface for device state and sync intents.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Fetch the device columns for a tenant.
    async fn get_device(&self, tenant_id: &str) -> Result<Option<DeviceRecord>, CoreError>;

    /// Apply `update` to a tenant's device state, creating the row if needed.
    ///
    /// With `expected_version`, the write only lands if the stored
    /// `sync_version` still equals it. Returns the written record, or `None`
    /// when the write was dropped as stale.
    ///
    /// Without it the write is last-write-wins: a lost race re-reads and
    /// reapplies, up to [`WRITE_ATTEMPTS`] times. `None` then means every
    /// attempt lost to a concurrent writer.
    async fn write_device_state(
        &self,
        tenant_id: &str,
        update: &DeviceUpdate,
        expected_version: Option<i64>,
    ) -> Result<Option<DeviceRecord>, CoreError>;

    /// List devices whose local status is `status`, oldest write first.
    async fn list_devices_by_status(
        &self,
        status: LocalStatus,
        limit: i64,
    ) -> Result<Vec<DeviceRecord>, CoreError>;

    /// Record an intent before calling the gateway.
    async fn record_intent(&self, intent: &SyncIntentRecord) -> Result<(), CoreError>;

    /// Mark an intent as finished.
    async fn resolve_intent(&self, intent_id: &str, outcome: &str) -> Result<(), CoreError>;

    /// Unresolved intents created before `created_before`, oldest first.
    async fn list_unresolved_intents(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SyncIntentRecord>, CoreError>;

    /// Cheap connectivity probe.
    async fn health_check_db(&self) -> Result<bool, CoreError>;
}
