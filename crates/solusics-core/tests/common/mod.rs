// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for solusics-core tests.
//!
//! Provides TestContext wiring an in-memory SQLite store to a mock gateway.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use solusics_core::device::{DeviceConnection, DeviceUpdate, LocalStatus};
use solusics_core::device_handlers::DeviceHandlerState;
use solusics_core::error::CoreError;
use solusics_core::gateway::{GatewayAction, GatewayResponse, MockGateway};
use solusics_core::migrations;
use solusics_core::persistence::{DeviceRecord, Persistence, SqlitePersistence, SyncIntentRecord};

/// Test context holding the store, the gateway, and the handler state.
pub struct TestContext {
    pub pool: SqlitePool,
    pub persistence: Arc<SqlitePersistence>,
    pub gateway: Arc<MockGateway>,
    pub state: Arc<DeviceHandlerState>,
}

impl TestContext {
    /// Context with an instant mock gateway.
    pub async fn new() -> Self {
        Self::with_gateway(MockGateway::new()).await
    }

    /// Context whose gateway waits `delay` before every reply.
    pub async fn with_delay(delay: Duration) -> Self {
        Self::with_gateway(MockGateway::with_delay(delay)).await
    }

    async fn with_gateway(gateway: MockGateway) -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run migrations");

        let persistence = Arc::new(SqlitePersistence::new(pool.clone()));
        let gateway = Arc::new(gateway);
        let state = Arc::new(DeviceHandlerState::new(
            persistence.clone(),
            gateway.clone(),
        ));

        Self {
            pool,
            persistence,
            gateway,
            state,
        }
    }

    /// Handler state sharing this context's store but using another gateway.
    pub fn state_with_gateway(&self, gateway: Arc<MockGateway>) -> DeviceHandlerState {
        DeviceHandlerState::new(self.persistence.clone(), gateway)
    }

    /// Handler state whose unconditional writes always lose to `competing`.
    pub fn contended_state(&self, competing: DeviceUpdate) -> DeviceHandlerState {
        let store = ContendedStore {
            inner: self.persistence.clone(),
            competing,
        };
        DeviceHandlerState::new(Arc::new(store), self.gateway.clone())
    }

    /// Write `update` unconditionally.
    pub async fn seed(&self, tenant_id: &str, update: DeviceUpdate) {
        self.persistence
            .write_device_state(tenant_id, &update, None)
            .await
            .expect("Failed to seed device");
    }

    /// Seed a tenant that is waiting for a QR scan.
    pub async fn seed_scanning(&self, tenant_id: &str, device_id: &str, qr: &str) {
        self.seed(
            tenant_id,
            DeviceUpdate::scanning_qr(Some(device_id.to_string()), Some(qr.to_string()))
                .with_whatsapp_number("6281234567890"),
        )
        .await;
    }

    /// Current stored device; panics if the tenant has no row.
    pub async fn device(&self, tenant_id: &str) -> DeviceConnection {
        self.persistence
            .get_device(tenant_id)
            .await
            .expect("Failed to read device")
            .expect("Device row missing")
            .to_connection()
            .expect("Failed to decode device")
    }
}

/// A successful gateway reply with the given `status`.
pub fn ok_status(status: &str) -> GatewayResponse {
    GatewayResponse {
        success: true,
        status: Some(status.to_string()),
        ..Default::default()
    }
}

/// Script a successful `disconnect` reply.
pub async fn allow_disconnect(gateway: &MockGateway) {
    gateway
        .respond(GatewayAction::Disconnect, ok_status("disconnected"))
        .await;
}

/// Store where another writer lands `competing` just before every
/// unconditional write, which then reports that it did not apply.
pub struct ContendedStore {
    inner: Arc<SqlitePersistence>,
    competing: DeviceUpdate,
}

#[async_trait]
impl Persistence for ContendedStore {
    async fn get_device(&self, tenant_id: &str) -> Result<Option<DeviceRecord>, CoreError> {
        self.inner.get_device(tenant_id).await
    }

    async fn write_device_state(
        &self,
        tenant_id: &str,
        update: &DeviceUpdate,
        expected_version: Option<i64>,
    ) -> Result<Option<DeviceRecord>, CoreError> {
        if expected_version.is_some() {
            return self
                .inner
                .write_device_state(tenant_id, update, expected_version)
                .await;
        }
        self.inner
            .write_device_state(tenant_id, &self.competing, None)
            .await?;
        Ok(None)
    }

    async fn list_devices_by_status(
        &self,
        status: LocalStatus,
        limit: i64,
    ) -> Result<Vec<DeviceRecord>, CoreError> {
        self.inner.list_devices_by_status(status, limit).await
    }

    async fn record_intent(&self, intent: &SyncIntentRecord) -> Result<(), CoreError> {
        self.inner.record_intent(intent).await
    }

    async fn resolve_intent(&self, intent_id: &str, outcome: &str) -> Result<(), CoreError> {
        self.inner.resolve_intent(intent_id, outcome).await
    }

    async fn list_unresolved_intents(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SyncIntentRecord>, CoreError> {
        self.inner
            .list_unresolved_intents(created_before, limit)
            .await
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        self.inner.health_check_db().await
    }
}
