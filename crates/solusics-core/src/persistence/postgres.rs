// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed persistence.
//!
//! Provides durable storage access functions for device state and sync intents.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use crate::device::{DeviceUpdate, LocalStatus};
use crate::error::CoreError;

use super::{DeviceRecord, Persistence, SyncIntentRecord, WRITE_ATTEMPTS};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Device Operations
// ============================================================================

/// Create an empty profile row for a tenant if none exists.
pub async fn ensure_profile(pool: &PgPool, tenant_id: &str) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO business_profiles (tenant_id, fonnte_status, sync_version, updated_at)
        VALUES ($1, 'disconnected', 0, NOW())
        ON CONFLICT (tenant_id) DO NOTHING
        "#,
    )
    .bind(tenant_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the device columns for a tenant.
pub async fn get_device(pool: &PgPool, tenant_id: &str) -> Result<Option<DeviceRecord>, CoreError> {
    let record = sqlx::query_as::<_, DeviceRecord>(
        r#"
        SELECT tenant_id, whatsapp_number, fonnte_device_id, fonnte_status,
               fonnte_qr_code_url, fonnte_qr_generated_at, fonnte_connected_at,
               fonnte_device_token, sync_version, updated_at
        FROM business_profiles
        WHERE tenant_id = $1
        "#,
    )
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Apply a device update, conditional on `expected_version` when given.
///
/// Unconditional writes retry a lost race up to [`WRITE_ATTEMPTS`] times.
pub async fn write_device_state(
    pool: &PgPool,
    tenant_id: &str,
    update: &DeviceUpdate,
    expected_version: Option<i64>,
) -> Result<Option<DeviceRecord>, CoreError> {
    ensure_profile(pool, tenant_id).await?;

    for attempt in 1..=WRITE_ATTEMPTS {
        let current = get_device(pool, tenant_id)
            .await?
            .ok_or_else(|| CoreError::DeviceNotFound {
                tenant_id: tenant_id.to_string(),
            })?;

        if expected_version.is_some_and(|v| v != current.sync_version) {
            return Ok(None);
        }

        let next = current.apply(update, Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE business_profiles
            SET whatsapp_number = $3,
                fonnte_device_id = $4,
                fonnte_status = $5,
                fonnte_qr_code_url = $6,
                fonnte_qr_generated_at = $7,
                fonnte_connected_at = $8,
                fonnte_device_token = $9,
                sync_version = $10,
                updated_at = $11
            WHERE tenant_id = $1 AND sync_version = $2
            "#,
        )
        .bind(tenant_id)
        .bind(current.sync_version)
        .bind(&next.whatsapp_number)
        .bind(&next.fonnte_device_id)
        .bind(&next.fonnte_status)
        .bind(&next.fonnte_qr_code_url)
        .bind(next.fonnte_qr_generated_at)
        .bind(next.fonnte_connected_at)
        .bind(&next.fonnte_device_token)
        .bind(next.sync_version)
        .bind(next.updated_at)
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Some(next));
        }
        // Someone else wrote between our read and update.
        if expected_version.is_some() {
            return Ok(None);
        }
        debug!(tenant_id, attempt, "Device write lost a race; retrying");
    }

    Ok(None)
}

/// List devices in a given local status, least recently written first.
pub async fn list_devices_by_status(
    pool: &PgPool,
    status: LocalStatus,
    limit: i64,
) -> Result<Vec<DeviceRecord>, CoreError> {
    let records = sqlx::query_as::<_, DeviceRecord>(
        r#"
        SELECT tenant_id, whatsapp_number, fonnte_device_id, fonnte_status,
               fonnte_qr_code_url, fonnte_qr_generated_at, fonnte_connected_at,
               fonnte_device_token, sync_version, updated_at
        FROM business_profiles
        WHERE fonnte_status = $1
        ORDER BY updated_at ASC
        LIMIT $2
        "#,
    )
    .bind(status.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

// ============================================================================
// Sync Intent Operations
// ============================================================================

/// Insert a new sync intent.
pub async fn record_intent(pool: &PgPool, intent: &SyncIntentRecord) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO device_sync_intents
            (intent_id, tenant_id, action, whatsapp_number, created_at, resolved_at, outcome)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&intent.intent_id)
    .bind(&intent.tenant_id)
    .bind(&intent.action)
    .bind(&intent.whatsapp_number)
    .bind(intent.created_at)
    .bind(intent.resolved_at)
    .bind(&intent.outcome)
    .execute(pool)
    .await?;

    Ok(())
}

/// Mark an intent as resolved. Resolving twice keeps the first outcome.
pub async fn resolve_intent(pool: &PgPool, intent_id: &str, outcome: &str) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        UPDATE device_sync_intents
        SET resolved_at = NOW(), outcome = $2
        WHERE intent_id = $1 AND resolved_at IS NULL
        "#,
    )
    .bind(intent_id)
    .bind(outcome)
    .execute(pool)
    .await?;

    Ok(())
}

/// Unresolved intents created before a cutoff.
pub async fn list_unresolved_intents(
    pool: &PgPool,
    created_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<SyncIntentRecord>, CoreError> {
    let records = sqlx::query_as::<_, SyncIntentRecord>(
        r#"
        SELECT intent_id, tenant_id, action, whatsapp_number, created_at, resolved_at, outcome
        FROM device_sync_intents
        WHERE resolved_at IS NULL AND created_at < $1
        ORDER BY created_at ASC
        LIMIT $2
        "#,
    )
    .bind(created_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

#[async_trait]
impl Persistence for PostgresPersistence {
    async fn get_device(&self, tenant_id: &str) -> Result<Option<DeviceRecord>, CoreError> {
        get_device(&self.pool, tenant_id).await
    }

    async fn write_device_state(
        &self,
        tenant_id: &str,
        update: &DeviceUpdate,
        expected_version: Option<i64>,
    ) -> Result<Option<DeviceRecord>, CoreError> {
        write_device_state(&self.pool, tenant_id, update, expected_version).await
    }

    async fn list_devices_by_status(
        &self,
        status: LocalStatus,
        limit: i64,
    ) -> Result<Vec<DeviceRecord>, CoreError> {
        list_devices_by_status(&self.pool, status, limit).await
    }

    async fn record_intent(&self, intent: &SyncIntentRecord) -> Result<(), CoreError> {
        record_intent(&self.pool, intent).await
    }

    async fn resolve_intent(&self, intent_id: &str, outcome: &str) -> Result<(), CoreError> {
        resolve_intent(&self.pool, intent_id, outcome).await
    }

    async fn list_unresolved_intents(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SyncIntentRecord>, CoreError> {
        list_unresolved_intents(&self.pool, created_before, limit).await
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
