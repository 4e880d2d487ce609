// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Messaging gateway client.
//!
//! The gateway owns the real device/session state. It is reached through a
//! proxy function that accepts one JSON shape for every action:
//!
//! ```text
//! POST {action, user_id, whatsapp_number?}
//!   -> {success, status?, qr_code?, device_id?, device_state?, device_info?, error?}
//! ```
//!
//! | Action | Purpose |
//! |--------|---------|
//! | `start-connection` | Register a phone; returns `connected` or a QR challenge |
//! | `get-device-status` | Live device state (`device_state`) |
//! | `check-status` | Cheap connection check (`status`) used while a QR is shown |
//! | `disconnect` | Tear down the device link |

pub mod http;
pub mod mock;

pub use self::http::{HttpGateway, HttpGatewayConfig};
pub use self::mock::MockGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::GatewayState;

/// Errors from gateway calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// The request never produced a response (connect, timeout, TLS).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The proxy answered with a non-2xx status.
    #[error("gateway returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The response body was not the expected JSON shape.
    #[error("malformed gateway response: {0}")]
    Decode(String),

    /// The gateway answered `success: false`.
    #[error("gateway rejected request: {0}")]
    Rejected(String),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Proxy action names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GatewayAction {
    StartConnection,
    GetDeviceStatus,
    CheckStatus,
    Disconnect,
}

/// Request body sent to the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub action: GatewayAction,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp_number: Option<String>,
}

/// Device details attached to status responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Gateway device identifier.
    #[serde(default)]
    pub device: Option<String>,
    /// Everything else the gateway reports (name, quota, expiry...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Response body returned by the proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GatewayResponse {
    /// Turn `success: false` into [`GatewayError::Rejected`].
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(GatewayError::Rejected(
                self.error
                    .unwrap_or_else(|| "gateway reported failure".to_string()),
            ))
        }
    }

    /// Parse `device_state`.
    pub fn gateway_state(&self) -> Result<GatewayState> {
        let raw = self
            .device_state
            .as_deref()
            .ok_or_else(|| GatewayError::Decode("missing device_state".to_string()))?;
        raw.parse()
            .map_err(|e: crate::device::UnknownVariant| GatewayError::Decode(e.to_string()))
    }

    /// Device id as reported, preferring `device_info.device` over `device_id`.
    pub fn reported_device_id(&self) -> Option<String> {
        self.device_info
            .as_ref()
            .and_then(|info| info.device.clone())
            .or_else(|| self.device_id.clone())
            .filter(|id| !id.is_empty())
    }
}

/// A client for the gateway proxy.
///
/// Implementors only provide [`send`](Self::send); the action helpers build
/// the request body.
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Short name for logs.
    fn gateway_type(&self) -> &'static str;

    /// Send one request to the proxy.
    async fn send(&self, request: &GatewayRequest) -> Result<GatewayResponse>;

    /// Ask the gateway to link `whatsapp_number` for `tenant_id`.
    async fn start_connection(
        &self,
        tenant_id: &str,
        whatsapp_number: &str,
    ) -> Result<GatewayResponse> {
        self.send(&GatewayRequest {
            action: GatewayAction::StartConnection,
            user_id: tenant_id.to_string(),
            whatsapp_number: Some(whatsapp_number.to_string()),
        })
        .await
    }

    /// Fetch the gateway's live device state.
    async fn device_status(
        &self,
        tenant_id: &str,
        whatsapp_number: Option<&str>,
    ) -> Result<GatewayResponse> {
        self.send(&GatewayRequest {
            action: GatewayAction::GetDeviceStatus,
            user_id: tenant_id.to_string(),
            whatsapp_number: whatsapp_number.map(str::to_string),
        })
        .await
    }

    /// Quick connection check while a QR challenge is outstanding.
    async fn check_status(&self, tenant_id: &str) -> Result<GatewayResponse> {
        self.send(&GatewayRequest {
            action: GatewayAction::CheckStatus,
            user_id: tenant_id.to_string(),
            whatsapp_number: None,
        })
        .await
    }

    /// Tear down the device link.
    async fn disconnect(&self, tenant_id: &str) -> Result<GatewayResponse> {
        self.send(&GatewayRequest {
            action: GatewayAction::Disconnect,
            user_id: tenant_id.to_string(),
            whatsapp_number: None,
        })
        .await
    }
}
