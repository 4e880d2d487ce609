// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Solusics Server - HTTP API for WhatsApp device links
//!
//! Exposes the device handlers from `solusics-core` to the connection panel
//! and runs the background workers that keep local state converged with the
//! gateway.
//!
//! # Configuration
//!
//! | Variable | Required | Default |
//! |----------|----------|---------|
//! | `SOLUSICS_DATABASE_URL` | yes | |
//! | `SOLUSICS_GATEWAY_URL` | yes | |
//! | `SOLUSICS_GATEWAY_TOKEN` | no | none |
//! | `SOLUSICS_GATEWAY_TIMEOUT_MS` | no | 15000 |
//! | `SOLUSICS_HTTP_PORT` | no | 8080 |
//! | `SOLUSICS_QR_POLL_INTERVAL_SECS` | no | 5 |
//! | `SOLUSICS_QR_LIFETIME_SECS` | no | 120 |
//! | `SOLUSICS_RECOVERY_INTERVAL_SECS` | no | 30 |
//! | `SOLUSICS_RECOVERY_THRESHOLD_SECS` | no | 60 |

/// HTTP routes and request/response bodies.
pub mod api;

/// Server configuration loaded from environment variables.
pub mod config;

/// Connection and migration for PostgreSQL or SQLite.
pub mod database;

/// Error to HTTP response mapping.
pub mod error;

/// Embeddable runtime (HTTP server plus workers) with graceful shutdown.
pub mod runtime;
