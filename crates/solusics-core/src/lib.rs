// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Solusics Core - WhatsApp Device Link Reconciliation
//!
//! This crate keeps each tenant's locally stored WhatsApp device link in step
//! with the messaging gateway. The gateway is the source of truth; the local
//! `business_profiles` row is a cache that is corrected on every reconcile.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          solusics-server                                 │
//! │                 (HTTP API, background workers, config)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        device_handlers                                   │
//! │        connect / reconcile / check status / disconnect / get             │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                         │                          │
//!           ▼                         ▼                          ▼
//! ┌───────────────────┐   ┌───────────────────────┐   ┌─────────────────────┐
//! │  DeviceGateway    │   │     Persistence       │   │   InFlightGuard     │
//! │  (HTTP / mock)    │   │  (PostgreSQL/SQLite)  │   │  (one per tenant)   │
//! └───────────────────┘   └───────────────────────┘   └─────────────────────┘
//! ```
//!
//! # Operations
//!
//! | Operation | Gateway action | Local effect |
//! |-----------|----------------|--------------|
//! | Connect | `start-connection` | `connected` or `scanning_qr` with QR, `error` on failure |
//! | Reconcile | `get-device-status` | Converge to gateway truth |
//! | Check status | `check-status` | Force `connected` when confirmed |
//! | Disconnect | `disconnect` | Clear device fields, `disconnected` |
//!
//! # Local Status State Machine
//!
//! ```text
//!                    connect (QR issued)
//!   disconnected ─────────────────────────► scanning_qr ──── QR lifetime ───► expired
//!        ▲  │                                    │
//!        │  │ connect (already linked)           │ reconcile: registered_connected
//!        │  ▼                                    ▼
//!        │ connected ◄───────────────────────────┘
//!        │  │
//!        └──┘ disconnect
//!
//!   any ── gateway failure on connect ──► error
//! ```
//!
//! `disconnect` succeeds from every state. A reconcile that sees
//! `registered_connected` forces `connected` whatever the prior status was.
//!
//! # Consistency
//!
//! - Every row carries a `sync_version`; reconcile writes are conditional on
//!   the version read before the gateway call, so a stale result never
//!   overwrites a newer one. Connect and disconnect writes are
//!   last-write-wins and fail with `WRITE_CONFLICT` rather than report a
//!   write that did not land.
//! - Connect and disconnect record a sync intent before calling the gateway.
//!   [`sync_recovery::SyncRecovery`] converges intents that were never resolved.
//! - [`qr_watcher::QrWatcher`] polls tenants in `scanning_qr` and expires QR
//!   codes that outlive their lifetime.

/// Device link model: local status, gateway state, and update descriptors.
pub mod device;

/// Connect, reconcile, check-status, and disconnect handlers.
pub mod device_handlers;

/// Status to display mapping (label, color, icon, recommended action).
pub mod display;

/// Error types with stable error codes.
pub mod error;

/// Messaging gateway client trait with HTTP and mock implementations.
pub mod gateway;

/// Per-tenant in-flight guard for reconciles.
pub mod inflight;

/// Embedded database migrations.
pub mod migrations;

/// Device and sync intent storage (PostgreSQL and SQLite).
pub mod persistence;

/// Background watcher for tenants awaiting a QR scan.
pub mod qr_watcher;

/// Background recovery of abandoned sync intents.
pub mod sync_recovery;

pub use device::{DeviceConnection, DeviceUpdate, GatewayState, LocalStatus};
pub use device_handlers::DeviceHandlerState;
pub use display::{RecommendedAction, StatusDisplay};
pub use error::{CoreError, Result};
pub use gateway::{DeviceGateway, HttpGateway, HttpGatewayConfig, MockGateway};
pub use persistence::{Persistence, PostgresPersistence, SqlitePersistence};
pub use qr_watcher::{QrWatcher, QrWatcherConfig};
pub use sync_recovery::{SyncRecovery, SyncRecoveryConfig};
