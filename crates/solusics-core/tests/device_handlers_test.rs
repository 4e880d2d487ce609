// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for device_handlers module.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::*;
use solusics_core::device::{DeviceUpdate, GatewayState, LocalStatus};
use solusics_core::device_handlers::{
    ConnectOutcome, handle_check_status, handle_connect, handle_disconnect, handle_get_device,
    handle_reconcile,
};
use solusics_core::display::{self, RecommendedAction};
use solusics_core::error::CoreError;
use solusics_core::gateway::{GatewayAction, GatewayResponse, MockGateway};
use solusics_core::persistence::Persistence;

const NUMBER: &str = "6281234567890";

async fn pending_intents(ctx: &TestContext) -> usize {
    ctx.persistence
        .list_unresolved_intents(Utc::now() + chrono::Duration::minutes(1), 100)
        .await
        .expect("Failed to list intents")
        .len()
}

// ============================================================================
// Connect
// ============================================================================

#[tokio::test]
async fn test_connect_with_qr_enters_scanning() {
    let ctx = TestContext::new().await;
    ctx.gateway
        .respond(
            GatewayAction::StartConnection,
            GatewayResponse {
                success: true,
                status: Some("scanning_qr".to_string()),
                qr_code: Some("data:image/png;base64,AAAA".to_string()),
                device_id: Some("d1".to_string()),
                ..Default::default()
            },
        )
        .await;

    let outcome = handle_connect(&ctx.state, "t1", NUMBER).await.unwrap();
    assert_eq!(
        outcome,
        ConnectOutcome::AwaitingQr {
            device_id: Some("d1".to_string()),
            qr_code: "data:image/png;base64,AAAA".to_string(),
        }
    );

    let device = ctx.device("t1").await;
    assert_eq!(device.local_status, LocalStatus::ScanningQr);
    assert_eq!(device.qr_payload.as_deref(), Some("data:image/png;base64,AAAA"));
    assert!(device.qr_generated_at.is_some());
    assert_eq!(device.device_id.as_deref(), Some("d1"));
    assert_eq!(device.whatsapp_number.as_deref(), Some(NUMBER));
    assert_eq!(pending_intents(&ctx).await, 0);

    let calls = ctx.gateway.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].user_id, "t1");
    assert_eq!(calls[0].whatsapp_number.as_deref(), Some(NUMBER));
}

#[tokio::test]
async fn test_connect_already_linked_sets_connected_without_qr() {
    let ctx = TestContext::new().await;
    ctx.gateway
        .respond(
            GatewayAction::StartConnection,
            GatewayResponse {
                success: true,
                status: Some("connected".to_string()),
                device_id: Some("d1".to_string()),
                ..Default::default()
            },
        )
        .await;

    let outcome = handle_connect(&ctx.state, "t1", NUMBER).await.unwrap();
    assert!(matches!(outcome, ConnectOutcome::Connected { .. }));

    let device = ctx.device("t1").await;
    assert_eq!(device.local_status, LocalStatus::Connected);
    assert!(device.connected_at.is_some());
    assert!(device.qr_payload.is_none());
    assert_eq!(device.device_id.as_deref(), Some("d1"));
}

#[tokio::test]
async fn test_connect_trims_number() {
    let ctx = TestContext::new().await;
    ctx.gateway
        .respond(GatewayAction::StartConnection, ok_status("connected"))
        .await;

    handle_connect(&ctx.state, "t1", "  6281234567890 ")
        .await
        .unwrap();

    let calls = ctx.gateway.calls().await;
    assert_eq!(calls[0].whatsapp_number.as_deref(), Some(NUMBER));
    assert_eq!(
        ctx.device("t1").await.whatsapp_number.as_deref(),
        Some(NUMBER)
    );
}

#[tokio::test]
async fn test_connect_rejects_empty_number_without_side_effects() {
    let ctx = TestContext::new().await;

    for number in ["", "   "] {
        let err = handle_connect(&ctx.state, "t1", number).await.unwrap_err();
        match err {
            CoreError::ValidationError { field, .. } => assert_eq!(field, "whatsapp_number"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    assert!(ctx.gateway.calls().await.is_empty());
    assert!(ctx.persistence.get_device("t1").await.unwrap().is_none());
    assert_eq!(pending_intents(&ctx).await, 0);
}

#[tokio::test]
async fn test_connect_rejects_empty_tenant() {
    let ctx = TestContext::new().await;

    let err = handle_connect(&ctx.state, "", NUMBER).await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
    assert!(ctx.gateway.calls().await.is_empty());
}

#[tokio::test]
async fn test_connect_lost_write_is_an_error() {
    let ctx = TestContext::new().await;
    ctx.gateway
        .respond(
            GatewayAction::StartConnection,
            GatewayResponse {
                success: true,
                qr_code: Some("qr-1".to_string()),
                ..Default::default()
            },
        )
        .await;
    let state = ctx.contended_state(DeviceUpdate::error());

    let err = handle_connect(&state, "t1", NUMBER).await.unwrap_err();
    assert!(matches!(err, CoreError::WriteConflict { .. }));

    let device = ctx.device("t1").await;
    assert_eq!(device.local_status, LocalStatus::Error);
    assert!(device.qr_payload.is_none());
    // Left open for the recovery worker.
    assert_eq!(pending_intents(&ctx).await, 1);
}

#[tokio::test]
async fn test_connect_gateway_failure_marks_error() {
    let ctx = TestContext::new().await;
    ctx.gateway
        .fail(GatewayAction::StartConnection, "connection refused")
        .await;

    let outcome = handle_connect(&ctx.state, "t1", NUMBER).await.unwrap();
    match outcome {
        ConnectOutcome::Error { message } => assert!(message.contains("connection refused")),
        other => panic!("expected error outcome, got {other:?}"),
    }

    let device = ctx.device("t1").await;
    assert_eq!(device.local_status, LocalStatus::Error);
    assert!(device.qr_payload.is_none());
    assert_eq!(pending_intents(&ctx).await, 0);
}

#[tokio::test]
async fn test_connect_without_qr_or_connected_is_error() {
    let ctx = TestContext::new().await;
    ctx.gateway
        .respond(GatewayAction::StartConnection, ok_status("pending"))
        .await;

    let outcome = handle_connect(&ctx.state, "t1", NUMBER).await.unwrap();
    assert!(matches!(outcome, ConnectOutcome::Error { .. }));
    assert_eq!(ctx.device("t1").await.local_status, LocalStatus::Error);
}

// ============================================================================
// Reconcile
// ============================================================================

#[tokio::test]
async fn test_reconcile_connected_overrides_any_prior_status() {
    let ctx = TestContext::new().await;
    ctx.gateway
        .set_device_state(GatewayState::RegisteredConnected, Some("d1"))
        .await;

    ctx.seed_scanning("scanning", "d1", "qr-1").await;
    ctx.seed("errored", DeviceUpdate::error()).await;
    ctx.seed("expired", DeviceUpdate::expired()).await;
    ctx.seed("disconnected", DeviceUpdate::disconnected()).await;

    for tenant in ["scanning", "errored", "expired", "disconnected", "fresh"] {
        let result = handle_reconcile(&ctx.state, tenant, None).await.unwrap();
        assert!(result.applied, "{tenant} should be written");
        assert_eq!(result.local_status, LocalStatus::Connected);
        assert_eq!(result.display.action, RecommendedAction::Disconnect);

        let device = ctx.device(tenant).await;
        assert_eq!(device.local_status, LocalStatus::Connected, "{tenant}");
        assert!(device.qr_payload.is_none(), "{tenant}");
        assert!(device.qr_generated_at.is_none(), "{tenant}");
        assert!(device.connected_at.is_some(), "{tenant}");
        assert_eq!(device.device_id.as_deref(), Some("d1"));
    }
}

#[tokio::test]
async fn test_reconcile_keeps_first_connected_at() {
    let ctx = TestContext::new().await;
    ctx.gateway
        .set_device_state(GatewayState::RegisteredConnected, Some("d1"))
        .await;

    handle_reconcile(&ctx.state, "t1", None).await.unwrap();
    let first = ctx.device("t1").await;

    ctx.gateway
        .set_device_state(GatewayState::RegisteredConnected, Some("d2"))
        .await;
    let result = handle_reconcile(&ctx.state, "t1", None).await.unwrap();
    assert!(result.applied);

    let second = ctx.device("t1").await;
    assert_eq!(second.device_id.as_deref(), Some("d2"));
    assert_eq!(second.connected_at, first.connected_at);
}

#[tokio::test]
async fn test_reconcile_scanning_records_device_id() {
    let ctx = TestContext::new().await;
    ctx.seed("t1", DeviceUpdate::disconnected()).await;
    ctx.gateway
        .set_device_state(GatewayState::RegisteredScanningQr, Some("d1"))
        .await;

    let result = handle_reconcile(&ctx.state, "t1", None).await.unwrap();
    assert_eq!(result.gateway_state, Some(GatewayState::RegisteredScanningQr));
    assert_eq!(result.device_id.as_deref(), Some("d1"));

    let device = ctx.device("t1").await;
    assert_eq!(device.local_status, LocalStatus::ScanningQr);
    assert_eq!(device.device_id.as_deref(), Some("d1"));
}

#[tokio::test]
async fn test_reconcile_not_found_recommends_register_without_writing() {
    let ctx = TestContext::new().await;
    ctx.seed("t1", DeviceUpdate::connected(Some("d1".into()), Some(Utc::now())))
        .await;
    let before = ctx.device("t1").await;
    ctx.gateway
        .set_device_state(GatewayState::NotFound, None)
        .await;

    let result = handle_reconcile(&ctx.state, "t1", None).await.unwrap();
    assert!(!result.applied);
    assert_eq!(result.display.action, RecommendedAction::Register);
    assert_eq!(result.display, display::for_status("not_found"));
    assert_eq!(ctx.device("t1").await, before);
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let ctx = TestContext::new().await;
    ctx.gateway
        .set_device_state(GatewayState::RegisteredConnected, Some("d1"))
        .await;

    let first = handle_reconcile(&ctx.state, "t1", None).await.unwrap();
    let version = ctx.device("t1").await.sync_version;
    let second = handle_reconcile(&ctx.state, "t1", None).await.unwrap();

    assert!(first.applied);
    assert!(!second.applied);
    assert_eq!(first.display, second.display);
    assert_eq!(ctx.device("t1").await.sync_version, version);
}

#[tokio::test]
async fn test_reconcile_gateway_failure_reports_unknown() {
    let ctx = TestContext::new().await;
    ctx.seed_scanning("t1", "d1", "qr-1").await;
    let before = ctx.device("t1").await;
    ctx.gateway
        .fail(GatewayAction::GetDeviceStatus, "timeout")
        .await;

    let result = handle_reconcile(&ctx.state, "t1", None).await.unwrap();
    assert_eq!(result.gateway_state, None);
    assert_eq!(result.display, display::unknown());
    assert_eq!(result.display.action, RecommendedAction::Register);
    assert_eq!(result.local_status, LocalStatus::ScanningQr);
    assert!(!result.applied);
    assert_eq!(ctx.device("t1").await, before);
}

#[tokio::test]
async fn test_reconcile_unrecognized_state_reports_unknown() {
    let ctx = TestContext::new().await;
    ctx.gateway
        .respond(
            GatewayAction::GetDeviceStatus,
            GatewayResponse {
                success: true,
                device_state: Some("banned".to_string()),
                ..Default::default()
            },
        )
        .await;

    let result = handle_reconcile(&ctx.state, "t1", None).await.unwrap();
    assert_eq!(result.display, display::unknown());
    assert!(ctx.persistence.get_device("t1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_reconcile_uses_stored_number_when_none_given() {
    let ctx = TestContext::new().await;
    ctx.seed_scanning("t1", "d1", "qr-1").await;
    ctx.gateway
        .set_device_state(GatewayState::RegisteredScanningQr, Some("d1"))
        .await;

    handle_reconcile(&ctx.state, "t1", None).await.unwrap();
    handle_reconcile(&ctx.state, "t1", Some("628999")).await.unwrap();

    let calls = ctx.gateway.calls().await;
    assert_eq!(calls[0].whatsapp_number.as_deref(), Some(NUMBER));
    assert_eq!(calls[1].whatsapp_number.as_deref(), Some("628999"));
}

#[tokio::test]
async fn test_reconcile_rejects_empty_tenant() {
    let ctx = TestContext::new().await;

    for tenant in ["", "   "] {
        let err = handle_reconcile(&ctx.state, tenant, None).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
    assert!(ctx.gateway.calls().await.is_empty());
    assert!(ctx.state.inflight.is_empty());
}

#[tokio::test]
async fn test_reconcile_rejects_overlap_for_same_tenant() {
    let ctx = TestContext::with_delay(Duration::from_millis(100)).await;
    ctx.gateway
        .set_device_state(GatewayState::RegisteredConnected, Some("d1"))
        .await;

    let (first, second) = tokio::join!(
        handle_reconcile(&ctx.state, "t1", None),
        handle_reconcile(&ctx.state, "t1", None),
    );

    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(CoreError::ReconcileInProgress { ref tenant_id }) if tenant_id == "t1"
    ));
    assert_eq!(
        ctx.gateway.call_count(GatewayAction::GetDeviceStatus).await,
        1
    );
    assert!(ctx.state.inflight.is_empty());
}

#[tokio::test]
async fn test_reconcile_allows_other_tenants_while_busy() {
    let ctx = TestContext::new().await;
    ctx.gateway
        .set_device_state(GatewayState::RegisteredConnected, Some("d1"))
        .await;
    let _permit = ctx.state.inflight.try_acquire("t1").unwrap();

    let err = handle_reconcile(&ctx.state, "t1", None).await.unwrap_err();
    assert_eq!(err.error_code(), "RECONCILE_IN_PROGRESS");
    assert!(handle_reconcile(&ctx.state, "t2", None).await.is_ok());
}

#[tokio::test]
async fn test_stale_reconcile_does_not_overwrite_disconnect() {
    let ctx = TestContext::with_delay(Duration::from_millis(300)).await;
    ctx.seed("t1", DeviceUpdate::connected(Some("d1".into()), Some(Utc::now())))
        .await;
    ctx.gateway
        .set_device_state(GatewayState::RegisteredScanningQr, Some("d2"))
        .await;

    let fast = Arc::new(MockGateway::new());
    allow_disconnect(&fast).await;
    let disconnect_state = ctx.state_with_gateway(fast);

    let (reconciled, disconnected) = tokio::join!(
        handle_reconcile(&ctx.state, "t1", None),
        async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle_disconnect(&disconnect_state, "t1").await
        },
    );

    assert!(disconnected.unwrap());
    let reconciled = reconciled.unwrap();
    assert!(!reconciled.applied);

    let device = ctx.device("t1").await;
    assert_eq!(device.local_status, LocalStatus::Disconnected);
    assert!(device.device_id.is_none());
}

// ============================================================================
// Check status
// ============================================================================

#[tokio::test]
async fn test_check_status_connected_marks_connected() {
    let ctx = TestContext::new().await;
    ctx.seed_scanning("t1", "d1", "qr-1").await;
    ctx.gateway
        .respond(GatewayAction::CheckStatus, ok_status("connected"))
        .await;

    let check = handle_check_status(&ctx.state, "t1").await.unwrap();
    assert_eq!(check.gateway_status.as_deref(), Some("connected"));
    assert_eq!(check.local_status, LocalStatus::Connected);
    assert_eq!(check.display, display::for_local_status(LocalStatus::Connected));

    let device = ctx.device("t1").await;
    assert_eq!(device.local_status, LocalStatus::Connected);
    assert!(device.qr_payload.is_none());
}

#[tokio::test]
async fn test_check_status_pending_leaves_state() {
    let ctx = TestContext::new().await;
    ctx.seed_scanning("t1", "d1", "qr-1").await;
    ctx.gateway
        .respond(GatewayAction::CheckStatus, ok_status("scanning_qr"))
        .await;

    let check = handle_check_status(&ctx.state, "t1").await.unwrap();
    assert_eq!(check.local_status, LocalStatus::ScanningQr);
    assert_eq!(ctx.device("t1").await.qr_payload.as_deref(), Some("qr-1"));
}

#[tokio::test]
async fn test_check_status_unreachable_gateway() {
    let ctx = TestContext::new().await;
    ctx.gateway.fail(GatewayAction::CheckStatus, "down").await;

    let check = handle_check_status(&ctx.state, "t1").await.unwrap();
    assert_eq!(check.gateway_status, None);
    assert_eq!(check.local_status, LocalStatus::Disconnected);
}

#[tokio::test]
async fn test_check_status_rejects_empty_tenant() {
    let ctx = TestContext::new().await;

    let err = handle_check_status(&ctx.state, "").await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
    assert!(ctx.gateway.calls().await.is_empty());
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_clears_device_fields() {
    let ctx = TestContext::new().await;
    ctx.seed_scanning("t1", "d1", "qr-1").await;
    allow_disconnect(&ctx.gateway).await;

    assert!(handle_disconnect(&ctx.state, "t1").await.unwrap());

    let device = ctx.device("t1").await;
    assert_eq!(device.local_status, LocalStatus::Disconnected);
    assert!(device.qr_payload.is_none());
    assert!(device.qr_generated_at.is_none());
    assert!(device.device_id.is_none());
    assert!(device.connected_at.is_none());
    assert_eq!(device.whatsapp_number.as_deref(), Some(NUMBER));
    assert_eq!(pending_intents(&ctx).await, 0);
}

#[tokio::test]
async fn test_disconnect_from_connected() {
    let ctx = TestContext::new().await;
    ctx.seed("t1", DeviceUpdate::connected(Some("d1".into()), Some(Utc::now())))
        .await;
    allow_disconnect(&ctx.gateway).await;

    assert!(handle_disconnect(&ctx.state, "t1").await.unwrap());
    assert_eq!(
        ctx.device("t1").await.local_status,
        LocalStatus::Disconnected
    );
}

#[tokio::test]
async fn test_disconnect_refused_leaves_state() {
    let ctx = TestContext::new().await;
    ctx.seed("t1", DeviceUpdate::connected(Some("d1".into()), Some(Utc::now())))
        .await;
    let before = ctx.device("t1").await;
    ctx.gateway
        .respond(
            GatewayAction::Disconnect,
            GatewayResponse {
                success: false,
                error: Some("device busy".to_string()),
                ..Default::default()
            },
        )
        .await;

    assert!(!handle_disconnect(&ctx.state, "t1").await.unwrap());
    assert_eq!(ctx.device("t1").await, before);
    assert_eq!(pending_intents(&ctx).await, 0);
}

#[tokio::test]
async fn test_disconnect_unreachable_gateway_returns_false() {
    let ctx = TestContext::new().await;
    ctx.gateway.fail(GatewayAction::Disconnect, "down").await;

    assert!(!handle_disconnect(&ctx.state, "t1").await.unwrap());
    assert!(ctx.persistence.get_device("t1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_disconnect_lost_write_is_not_success() {
    let ctx = TestContext::new().await;
    ctx.seed("t1", DeviceUpdate::connected(Some("d1".into()), Some(Utc::now())))
        .await;
    allow_disconnect(&ctx.gateway).await;
    let state = ctx.contended_state(DeviceUpdate::connected(Some("d1".into()), None));

    let err = handle_disconnect(&state, "t1").await.unwrap_err();
    assert!(matches!(err, CoreError::WriteConflict { .. }));
    assert_eq!(err.error_code(), "WRITE_CONFLICT");

    assert_eq!(ctx.device("t1").await.local_status, LocalStatus::Connected);
    assert_eq!(pending_intents(&ctx).await, 1);
}

// ============================================================================
// Queries
// ============================================================================

#[tokio::test]
async fn test_get_device_unknown_tenant_is_unlinked() {
    let ctx = TestContext::new().await;

    let view = handle_get_device(&ctx.state, "nobody").await.unwrap();
    assert_eq!(view.device.tenant_id, "nobody");
    assert_eq!(view.device.local_status, LocalStatus::Disconnected);
    assert!(view.device.device_id.is_none());
    assert_eq!(
        view.display,
        display::for_local_status(LocalStatus::Disconnected)
    );
}

#[tokio::test]
async fn test_get_device_serializes_flat() {
    let ctx = TestContext::new().await;
    ctx.seed_scanning("t1", "d1", "qr-1").await;

    let view = handle_get_device(&ctx.state, "t1").await.unwrap();
    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["tenant_id"], "t1");
    assert_eq!(json["local_status"], "scanning_qr");
    assert_eq!(json["display"]["action"], "wait");
}
