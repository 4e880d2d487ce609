// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gateway client over HTTP (reqwest).

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{DeviceGateway, GatewayError, GatewayRequest, GatewayResponse, Result};

/// Longest response body kept in a [`GatewayError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Settings for [`HttpGateway`].
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    /// Proxy function URL.
    pub url: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpGatewayConfig {
    /// Config with the default 15 second timeout and no token.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            timeout: Duration::from_secs(15),
        }
    }
}

/// Gateway client that POSTs to the proxy function.
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    config: HttpGatewayConfig,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("url", &self.config.url)
            .field("token", &self.config.token.as_ref().map(|_| "..."))
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

impl HttpGateway {
    /// Build a client for the given proxy.
    pub fn new(config: HttpGatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// The configured proxy URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl DeviceGateway for HttpGateway {
    fn gateway_type(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self, request), fields(action = ?request.action, tenant_id = %request.user_id))]
    async fn send(&self, request: &GatewayRequest) -> Result<GatewayResponse> {
        let mut builder = self.client.post(&self.config.url).json(request);
        if let Some(token) = &self.config.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response
            .json::<GatewayResponse>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        debug!(
            success = parsed.success,
            status = ?parsed.status,
            device_state = ?parsed.device_state,
            "Gateway responded"
        );

        Ok(parsed)
    }
}
