// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::debug;

use crate::device::{DeviceUpdate, LocalStatus};
use crate::error::CoreError;
use crate::migrations;

use super::{DeviceRecord, Persistence, SyncIntentRecord, WRITE_ATTEMPTS};

const DEVICE_COLUMNS: &str = "tenant_id, whatsapp_number, fonnte_device_id, fonnte_status, \
     fonnte_qr_code_url, fonnte_qr_generated_at, fonnte_connected_at, \
     fonnte_device_token, sync_version, updated_at";

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file when missing,
    /// then runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn get_device(&self, tenant_id: &str) -> Result<Option<DeviceRecord>, CoreError> {
        let record = sqlx::query_as::<_, DeviceRecord>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM business_profiles WHERE tenant_id = ?"
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn write_device_state(
        &self,
        tenant_id: &str,
        update: &DeviceUpdate,
        expected_version: Option<i64>,
    ) -> Result<Option<DeviceRecord>, CoreError> {
        sqlx::query(
            r#"
            INSERT INTO business_profiles (tenant_id, fonnte_status, sync_version, updated_at)
            VALUES (?, 'disconnected', 0, ?)
            ON CONFLICT (tenant_id) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        for attempt in 1..=WRITE_ATTEMPTS {
            let current = self
                .get_device(tenant_id)
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
                SET whatsapp_number = ?,
                    fonnte_device_id = ?,
                    fonnte_status = ?,
                    fonnte_qr_code_url = ?,
                    fonnte_qr_generated_at = ?,
                    fonnte_connected_at = ?,
                    fonnte_device_token = ?,
                    sync_version = ?,
                    updated_at = ?
                WHERE tenant_id = ? AND sync_version = ?
                "#,
            )
            .bind(&next.whatsapp_number)
            .bind(&next.fonnte_device_id)
            .bind(&next.fonnte_status)
            .bind(&next.fonnte_qr_code_url)
            .bind(next.fonnte_qr_generated_at)
            .bind(next.fonnte_connected_at)
            .bind(&next.fonnte_device_token)
            .bind(next.sync_version)
            .bind(next.updated_at)
            .bind(tenant_id)
            .bind(current.sync_version)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                return Ok(Some(next));
            }
            if expected_version.is_some() {
                return Ok(None);
            }
            debug!(tenant_id, attempt, "Device write lost a race; retrying");
        }

        Ok(None)
    }

    async fn list_devices_by_status(
        &self,
        status: LocalStatus,
        limit: i64,
    ) -> Result<Vec<DeviceRecord>, CoreError> {
        let records = sqlx::query_as::<_, DeviceRecord>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM business_profiles \
             WHERE fonnte_status = ? ORDER BY updated_at ASC LIMIT ?"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn record_intent(&self, intent: &SyncIntentRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO device_sync_intents
                (intent_id, tenant_id, action, whatsapp_number, created_at, resolved_at, outcome)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&intent.intent_id)
        .bind(&intent.tenant_id)
        .bind(&intent.action)
        .bind(&intent.whatsapp_number)
        .bind(intent.created_at)
        .bind(intent.resolved_at)
        .bind(&intent.outcome)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn resolve_intent(&self, intent_id: &str, outcome: &str) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE device_sync_intents
            SET resolved_at = ?, outcome = ?
            WHERE intent_id = ? AND resolved_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(outcome)
        .bind(intent_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_unresolved_intents(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SyncIntentRecord>, CoreError> {
        let records = sqlx::query_as::<_, SyncIntentRecord>(
            r#"
            SELECT intent_id, tenant_id, action, whatsapp_number, created_at, resolved_at, outcome
            FROM device_sync_intents
            WHERE resolved_at IS NULL AND created_at < ?
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(created_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn health_check_db(&self) -> Result<bool, CoreError> {
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
