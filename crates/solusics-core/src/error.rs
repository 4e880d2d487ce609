// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for solusics-core.
//!
//! Provides a unified error type with stable codes for API responses.

use thiserror::Error;

use crate::gateway::GatewayError;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while handling a device request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Input validation failed.
    #[error("Validation error for '{field}': {message}")]
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// The tenant has no business profile row.
    #[error("No device record for tenant '{tenant_id}'")]
    DeviceNotFound {
        /// The tenant that was looked up.
        tenant_id: String,
    },

    /// Another reconciliation for the same tenant is still running.
    #[error("Reconciliation already in progress for tenant '{tenant_id}'")]
    ReconcileInProgress {
        /// The busy tenant.
        tenant_id: String,
    },

    /// A device write kept losing to concurrent writers and did not land.
    #[error("Device state for tenant '{tenant_id}' changed concurrently; write not applied")]
    WriteConflict {
        /// The tenant whose row was contended.
        tenant_id: String,
    },

    /// A gateway call failed.
    ///
    /// The device handlers never return this: they report gateway failures
    /// inside their results. It exists for callers that use a
    /// [`DeviceGateway`](crate::gateway::DeviceGateway) directly and
    /// propagate with `?`.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DeviceNotFound { .. } => "DEVICE_NOT_FOUND",
            Self::ReconcileInProgress { .. } => "RECONCILE_IN_PROGRESS",
            Self::WriteConflict { .. } => "WRITE_CONFLICT",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    pub(crate) fn validation(field: &str, message: &str) -> Self {
        Self::ValidationError {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CoreError::DatabaseError {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}
