// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status display mapping consumed by the connection panel and the QR modal.

use serde::{Deserialize, Serialize};

use crate::device::{GatewayState, LocalStatus};

/// What the UI should offer the tenant next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Register,
    Reconnect,
    Disconnect,
    Wait,
}

/// Display tuple for a device status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusDisplay {
    pub text: &'static str,
    pub color: &'static str,
    pub icon: &'static str,
    pub action: RecommendedAction,
}

impl StatusDisplay {
    const fn new(
        text: &'static str,
        color: &'static str,
        icon: &'static str,
        action: RecommendedAction,
    ) -> Self {
        Self {
            text,
            color,
            icon,
            action,
        }
    }
}

const NOT_REGISTERED: StatusDisplay = StatusDisplay::new(
    "Belum terdaftar",
    "gray",
    "phone-off",
    RecommendedAction::Register,
);
const CONNECTED: StatusDisplay = StatusDisplay::new(
    "Terhubung",
    "green",
    "check-circle",
    RecommendedAction::Disconnect,
);
const DISCONNECTED: StatusDisplay = StatusDisplay::new(
    "Terputus",
    "red",
    "x-circle",
    RecommendedAction::Reconnect,
);
const SCANNING: StatusDisplay = StatusDisplay::new(
    "Menunggu scan QR",
    "yellow",
    "qr-code",
    RecommendedAction::Wait,
);
// Gateway errors share the reconnect path with plain disconnection.
const ERROR: StatusDisplay = StatusDisplay::new(
    "Error",
    "red",
    "alert-triangle",
    RecommendedAction::Reconnect,
);
const EXPIRED: StatusDisplay = StatusDisplay::new(
    "QR kedaluwarsa",
    "orange",
    "clock",
    RecommendedAction::Reconnect,
);
const UNKNOWN: StatusDisplay = StatusDisplay::new(
    "Status tidak diketahui",
    "gray",
    "help-circle",
    RecommendedAction::Register,
);

/// Map a gateway state to its display tuple.
pub fn for_gateway_state(state: GatewayState) -> StatusDisplay {
    match state {
        GatewayState::NotFound => NOT_REGISTERED,
        GatewayState::RegisteredConnected => CONNECTED,
        GatewayState::RegisteredDisconnected => DISCONNECTED,
        GatewayState::RegisteredScanningQr => SCANNING,
        GatewayState::RegisteredError => ERROR,
    }
}

/// Map a local status to its display tuple.
pub fn for_local_status(status: LocalStatus) -> StatusDisplay {
    match status {
        LocalStatus::Disconnected => DISCONNECTED,
        LocalStatus::ScanningQr => SCANNING,
        LocalStatus::Connected => CONNECTED,
        LocalStatus::Error => ERROR,
        LocalStatus::Expired => EXPIRED,
    }
}

/// Display used when the gateway could not be reached.
pub fn unknown() -> StatusDisplay {
    UNKNOWN
}

/// Map any status or state spelling to its display tuple.
///
/// Accepts both [`GatewayState`] and [`LocalStatus`] spellings; anything
/// else maps to the unknown display.
pub fn for_status(status: &str) -> StatusDisplay {
    if let Ok(state) = status.parse::<GatewayState>() {
        return for_gateway_state(state);
    }
    match status.parse::<LocalStatus>() {
        Ok(local) => for_local_status(local),
        Err(_) => UNKNOWN,
    }
}
