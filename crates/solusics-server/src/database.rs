// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database connection and migration for the configured backend.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use solusics_core::migrations;
use solusics_core::persistence::{Persistence, PostgresPersistence, SqlitePersistence};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use crate::config::DatabaseBackend;

/// Connect to `database_url`, apply migrations, and return the persistence layer.
pub async fn connect(
    backend: DatabaseBackend,
    database_url: &str,
) -> Result<Arc<dyn Persistence>> {
    match backend {
        DatabaseBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await?;
            info!("Connected to PostgreSQL");

            migrations::run_postgres(&pool).await?;
            info!("Database migrations applied");

            Ok(Arc::new(PostgresPersistence::new(pool)))
        }
        DatabaseBackend::Sqlite => {
            let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
            // Every connection to an in-memory database is a separate database.
            let max_connections = if database_url.contains(":memory:") {
                1
            } else {
                5
            };
            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?;
            info!("Connected to SQLite");

            migrations::run_sqlite(&pool).await?;
            info!("Database migrations applied");

            Ok(Arc::new(SqlitePersistence::new(pool)))
        }
    }
}
