// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Device link domain types.
//!
//! A tenant's WhatsApp link is tracked twice: the status this service last
//! wrote ([`LocalStatus`]) and the state the gateway reports right now
//! ([`GatewayState`]). The two are deliberately separate enums; they may
//! disagree until the next reconciliation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status last written by this service for a tenant's device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalStatus {
    /// No link, or the link was torn down.
    #[default]
    Disconnected,
    /// A QR challenge is outstanding.
    ScanningQr,
    /// The gateway confirmed the phone is linked.
    Connected,
    /// The last gateway call failed.
    Error,
    /// The QR challenge outlived its lifetime without being scanned.
    Expired,
}

impl LocalStatus {
    /// Database/wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::ScanningQr => "scanning_qr",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Expired => "expired",
        }
    }

    /// Whether a QR payload may be stored alongside this status.
    pub fn allows_qr(&self) -> bool {
        matches!(self, Self::ScanningQr)
    }
}

impl fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocalStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(Self::Disconnected),
            "scanning_qr" => Ok(Self::ScanningQr),
            "connected" => Ok(Self::Connected),
            "error" => Ok(Self::Error),
            "expired" => Ok(Self::Expired),
            other => Err(UnknownVariant {
                kind: "local status",
                value: other.to_string(),
            }),
        }
    }
}

/// The gateway's live view of a tenant's device. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    /// The gateway has no device registered for this tenant.
    NotFound,
    RegisteredConnected,
    RegisteredDisconnected,
    RegisteredScanningQr,
    RegisteredError,
}

impl GatewayState {
    /// Wire spelling used by the gateway proxy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::RegisteredConnected => "registered_connected",
            Self::RegisteredDisconnected => "registered_disconnected",
            Self::RegisteredScanningQr => "registered_scanning_qr",
            Self::RegisteredError => "registered_error",
        }
    }
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found" => Ok(Self::NotFound),
            "registered_connected" => Ok(Self::RegisteredConnected),
            "registered_disconnected" => Ok(Self::RegisteredDisconnected),
            "registered_scanning_qr" => Ok(Self::RegisteredScanningQr),
            "registered_error" => Ok(Self::RegisteredError),
            other => Err(UnknownVariant {
                kind: "gateway state",
                value: other.to_string(),
            }),
        }
    }
}

/// Returned when a stored or received string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The offending value.
    pub value: String,
}

/// A tenant's device link as held in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConnection {
    pub tenant_id: String,
    pub device_id: Option<String>,
    pub local_status: LocalStatus,
    /// Base64 QR image; only meaningful while `local_status` is `scanning_qr`.
    pub qr_payload: Option<String>,
    pub qr_generated_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Phone number last used to connect.
    pub whatsapp_number: Option<String>,
    /// Bumped on every device-state write.
    pub sync_version: i64,
    pub updated_at: DateTime<Utc>,
}

impl DeviceConnection {
    /// A tenant that has never attempted to connect.
    pub fn unlinked(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            device_id: None,
            local_status: LocalStatus::Disconnected,
            qr_payload: None,
            qr_generated_at: None,
            connected_at: None,
            whatsapp_number: None,
            sync_version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Whether the outstanding QR challenge is older than `lifetime`.
    ///
    /// Rows without an issue time age from their last write.
    pub fn qr_expired(&self, now: DateTime<Utc>, lifetime: chrono::Duration) -> bool {
        let issued = self.qr_generated_at.unwrap_or(self.updated_at);
        self.local_status == LocalStatus::ScanningQr && now - issued > lifetime
    }
}

/// A write to the device columns of a tenant's profile.
///
/// Built through the transition constructors so the QR payload is only ever
/// carried with `scanning_qr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceUpdate {
    pub status: LocalStatus,
    pub device_id: FieldUpdate<String>,
    pub qr_payload: FieldUpdate<String>,
    pub connected_at: FieldUpdate<DateTime<Utc>>,
    pub whatsapp_number: FieldUpdate<String>,
    /// Also clear the stored gateway device token.
    pub clear_device_token: bool,
}

/// How a single nullable column is affected by a [`DeviceUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldUpdate<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> FieldUpdate<T> {
    /// Resolve against the current stored value.
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            Self::Keep => current,
            Self::Set(value) => Some(value),
            Self::Clear => None,
        }
    }

    /// Set when `value` is present, keep otherwise.
    pub fn set_if_some(value: Option<T>) -> Self {
        value.map_or(Self::Keep, Self::Set)
    }
}

impl DeviceUpdate {
    fn with_status(status: LocalStatus) -> Self {
        Self {
            status,
            device_id: FieldUpdate::Keep,
            qr_payload: if status.allows_qr() {
                FieldUpdate::Keep
            } else {
                FieldUpdate::Clear
            },
            connected_at: FieldUpdate::Keep,
            whatsapp_number: FieldUpdate::Keep,
            clear_device_token: false,
        }
    }

    /// The gateway confirmed the link.
    ///
    /// `connected_at` is only written when the caller passes a timestamp;
    /// reconciliation keeps the first confirmation time.
    pub fn connected(device_id: Option<String>, connected_at: Option<DateTime<Utc>>) -> Self {
        Self {
            device_id: FieldUpdate::set_if_some(device_id),
            connected_at: FieldUpdate::set_if_some(connected_at),
            ..Self::with_status(LocalStatus::Connected)
        }
    }

    /// A QR challenge is outstanding. A fresh `qr_payload` supersedes the old one.
    pub fn scanning_qr(device_id: Option<String>, qr_payload: Option<String>) -> Self {
        Self {
            device_id: FieldUpdate::set_if_some(device_id),
            qr_payload: FieldUpdate::set_if_some(qr_payload),
            ..Self::with_status(LocalStatus::ScanningQr)
        }
    }

    /// Link torn down; every device field is cleared.
    pub fn disconnected() -> Self {
        Self {
            device_id: FieldUpdate::Clear,
            connected_at: FieldUpdate::Clear,
            clear_device_token: true,
            ..Self::with_status(LocalStatus::Disconnected)
        }
    }

    /// A gateway call failed.
    pub fn error() -> Self {
        Self::with_status(LocalStatus::Error)
    }

    /// The QR challenge lapsed.
    pub fn expired() -> Self {
        Self::with_status(LocalStatus::Expired)
    }

    /// Record the phone number used for this attempt.
    pub fn with_whatsapp_number(mut self, number: impl Into<String>) -> Self {
        self.whatsapp_number = FieldUpdate::Set(number.into());
        self
    }

    /// Whether this update stamps a new QR issue time.
    pub fn issues_qr(&self) -> bool {
        matches!(self.qr_payload, FieldUpdate::Set(_))
    }
}
