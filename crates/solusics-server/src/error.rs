// Copyright (C) 2025 Solusics.ai
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error responses.
//!
//! Every failure is rendered as `{"error": {"code", "message"}}` with a status
//! derived from the core error code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use solusics_core::CoreError;
use tracing::error;

/// An error returned from an API handler.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            CoreError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            CoreError::DeviceNotFound { .. } => StatusCode::NOT_FOUND,
            CoreError::ReconcileInProgress { .. } | CoreError::WriteConflict { .. } => {
                StatusCode::CONFLICT
            }
            CoreError::Gateway(_) => StatusCode::BAD_GATEWAY,
            CoreError::DatabaseError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(code = self.0.error_code(), error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.error_code(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
