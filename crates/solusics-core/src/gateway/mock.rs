// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock gateway for testing.
//!
//! Replies with scripted responses per action and records every request,
//! without touching the network.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{DeviceGateway, GatewayAction, GatewayError, GatewayRequest, GatewayResponse, Result};

#[derive(Debug, Clone)]
enum MockReply {
    Respond(GatewayResponse),
    Fail(String),
}

/// Mock gateway for testing.
#[derive(Debug, Default)]
pub struct MockGateway {
    replies: Mutex<HashMap<GatewayAction, MockReply>>,
    calls: Mutex<Vec<GatewayRequest>>,
    /// Delay applied before every reply, to hold requests in flight.
    pub delay: Duration,
}

impl MockGateway {
    /// Create a mock with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that waits `delay` before replying.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Reply to `action` with `response` from now on.
    pub async fn respond(&self, action: GatewayAction, response: GatewayResponse) {
        self.replies
            .lock()
            .await
            .insert(action, MockReply::Respond(response));
    }

    /// Reply to `action` with a transport failure from now on.
    pub async fn fail(&self, action: GatewayAction, message: &str) {
        self.replies
            .lock()
            .await
            .insert(action, MockReply::Fail(message.to_string()));
    }

    /// Convenience: `get-device-status` answers with `state` and optional device id.
    pub async fn set_device_state(&self, state: crate::device::GatewayState, device: Option<&str>) {
        self.respond(
            GatewayAction::GetDeviceStatus,
            GatewayResponse {
                success: true,
                device_state: Some(state.as_str().to_string()),
                device_info: device.map(|d| super::DeviceInfo {
                    device: Some(d.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await;
    }

    /// Every request received so far.
    pub async fn calls(&self) -> Vec<GatewayRequest> {
        self.calls.lock().await.clone()
    }

    /// Number of requests received for `action`.
    pub async fn call_count(&self, action: GatewayAction) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.action == action)
            .count()
    }
}

#[async_trait]
impl DeviceGateway for MockGateway {
    fn gateway_type(&self) -> &'static str {
        "mock"
    }

    async fn send(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
        self.calls.lock().await.push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = self.replies.lock().await.get(&request.action).cloned();
        match reply {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Fail(message)) => Err(GatewayError::Transport(message)),
            None => Ok(GatewayResponse {
                success: false,
                error: Some(format!("no scripted reply for {:?}", request.action)),
                ..Default::default()
            }),
        }
    }
}
