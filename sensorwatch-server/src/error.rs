// Sensorwatch Server - HTTP surface for the Sensorwatch pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for the server binary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sensorwatch::{ConfigError, RejectionReason, SensorwatchError, StorageError};
use serde::Serialize;
use thiserror::Error;

/// Startup errors. Logged before the process exits non-zero.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] SensorwatchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Rejected(#[from] RejectionReason),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<SensorwatchError> for ApiError {
    fn from(e: SensorwatchError) -> Self {
        match e {
            SensorwatchError::Rejected(r) => ApiError::Rejected(r),
            SensorwatchError::Storage(s) => ApiError::Storage(s),
            SensorwatchError::Config(c) => ApiError::Config(c),
            other => ApiError::Storage(StorageError::Transient(other.to_string())),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Rejected(RejectionReason::MalformedPayload(_)) => StatusCode::BAD_REQUEST,
            ApiError::Rejected(RejectionReason::Unavailable) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Config(ConfigError::Load(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) | ApiError::Storage(StorageError::NotFound(_)) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Rejected(reason) => reason.code(),
            ApiError::Config(_) => "invalid_config",
            ApiError::Storage(_) => "storage_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
