// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API routes.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | GET | `/health` | database health |
//! | GET | `/api/v1/tenants/{tenant_id}/device` | stored device + display |
//! | POST | `/api/v1/tenants/{tenant_id}/device/connect` | start connection |
//! | POST | `/api/v1/tenants/{tenant_id}/device/sync` | reconcile with gateway |
//! | POST | `/api/v1/tenants/{tenant_id}/device/check` | quick connection check |
//! | POST | `/api/v1/tenants/{tenant_id}/device/disconnect` | disconnect |
//! | GET | `/api/v1/status-display/{status}` | display tuple for a status |

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use solusics_core::CoreError;
use solusics_core::device_handlers::{
    self, ConnectOutcome, ConnectionCheck, DeviceHandlerState, DeviceView, Reconciliation,
};
use solusics_core::display::{self, StatusDisplay};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::ApiError;

/// Body of a connect request.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectRequest {
    /// Phone number to link. Missing reads as empty and fails validation.
    #[serde(default)]
    pub whatsapp_number: String,
}

/// Optional body of a sync request.
#[derive(Debug, Default, Deserialize)]
pub struct SyncRequest {
    /// Overrides the stored number for this reconcile.
    #[serde(default)]
    pub whatsapp_number: Option<String>,
}

/// Body of a disconnect response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisconnectResponse {
    pub success: bool,
}

/// Body of the health response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

/// Build the API router over shared handler state.
pub fn router(state: Arc<DeviceHandlerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/tenants/{tenant_id}/device", get(get_device))
        .route("/api/v1/tenants/{tenant_id}/device/connect", post(connect))
        .route("/api/v1/tenants/{tenant_id}/device/sync", post(sync))
        .route("/api/v1/tenants/{tenant_id}/device/check", post(check))
        .route(
            "/api/v1/tenants/{tenant_id}/device/disconnect",
            post(disconnect),
        )
        .route("/api/v1/status-display/{status}", get(status_display))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<Arc<DeviceHandlerState>>) -> impl IntoResponse {
    match state.persistence.health_check_db().await {
        Ok(true) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                database: "ok".to_string(),
            }),
        ),
        Ok(false) | Err(_) => {
            warn!("Database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded".to_string(),
                    database: "unavailable".to_string(),
                }),
            )
        }
    }
}

async fn get_device(
    State(state): State<Arc<DeviceHandlerState>>,
    Path(tenant_id): Path<String>,
) -> Result<Json<DeviceView>, ApiError> {
    Ok(Json(
        device_handlers::handle_get_device(&state, &tenant_id).await?,
    ))
}

async fn connect(
    State(state): State<Arc<DeviceHandlerState>>,
    Path(tenant_id): Path<String>,
    body: Bytes,
) -> Result<Json<ConnectOutcome>, ApiError> {
    let request: ConnectRequest = parse_body(&body)?.unwrap_or_default();
    Ok(Json(
        device_handlers::handle_connect(&state, &tenant_id, &request.whatsapp_number).await?,
    ))
}

async fn sync(
    State(state): State<Arc<DeviceHandlerState>>,
    Path(tenant_id): Path<String>,
    body: Bytes,
) -> Result<Json<Reconciliation>, ApiError> {
    let request: SyncRequest = parse_body(&body)?.unwrap_or_default();
    Ok(Json(
        device_handlers::handle_reconcile(&state, &tenant_id, request.whatsapp_number.as_deref())
            .await?,
    ))
}

async fn check(
    State(state): State<Arc<DeviceHandlerState>>,
    Path(tenant_id): Path<String>,
) -> Result<Json<ConnectionCheck>, ApiError> {
    Ok(Json(
        device_handlers::handle_check_status(&state, &tenant_id).await?,
    ))
}

async fn disconnect(
    State(state): State<Arc<DeviceHandlerState>>,
    Path(tenant_id): Path<String>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let success = device_handlers::handle_disconnect(&state, &tenant_id).await?;
    Ok(Json(DisconnectResponse { success }))
}

async fn status_display(Path(status): Path<String>) -> Json<StatusDisplay> {
    Json(display::for_status(&status))
}

/// Parse an optional JSON body. An empty body is `None`.
fn parse_body<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<Option<T>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body).map(Some).map_err(|e| {
        ApiError(CoreError::ValidationError {
            field: "body".to_string(),
            message: e.to_string(),
        })
    })
}
