//! Error handling for the snapshot manager
//!
//! This module defines the error taxonomy shared by the retention, lock,
//! deletion and sync components, and how each error surfaces over HTTP.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use snapshot_shared::FailureReason;
use thiserror::Error;

/// Result type alias for snapshot manager operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Main error type for the snapshot manager
#[derive(Error, Debug, Clone)]
pub enum SnapshotError {
    /// Rate limiting or timeout at the provider; worth retrying
    #[error("Transient provider error: {operation}: {message}")]
    TransientProvider { operation: String, message: String },

    /// Caller lacks rights for this item; fatal for the item only
    #[error("Authorization error: {message}")]
    Authorization { message: String },

    /// A removed lock could not be put back
    #[error("Lock restoration failed for {resource_group}/{lock_name}: {message}")]
    LockRestoration {
        resource_group: String,
        lock_name: String,
        message: String,
    },

    /// Item is already gone
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    /// Malformed request, rejected before any provider call
    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    /// Non-transient provider failure
    #[error("Provider error: {operation}: {message}")]
    Provider { operation: String, message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Operation abandoned because its batch was cancelled
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// Internal service errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SnapshotError {
    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            SnapshotError::TransientProvider { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SnapshotError::Authorization { .. } => StatusCode::FORBIDDEN,
            SnapshotError::LockRestoration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SnapshotError::NotFound { .. } => StatusCode::NOT_FOUND,
            SnapshotError::Validation { .. } => StatusCode::BAD_REQUEST,
            SnapshotError::Provider { .. } => StatusCode::BAD_GATEWAY,
            SnapshotError::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SnapshotError::Serialization { .. } => StatusCode::BAD_REQUEST,
            SnapshotError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SnapshotError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            SnapshotError::TransientProvider { .. } => "TRANSIENT_PROVIDER_ERROR",
            SnapshotError::Authorization { .. } => "AUTHORIZATION_ERROR",
            SnapshotError::LockRestoration { .. } => "LOCK_RESTORATION_ERROR",
            SnapshotError::NotFound { .. } => "NOT_FOUND",
            SnapshotError::Validation { .. } => "VALIDATION_ERROR",
            SnapshotError::Provider { .. } => "PROVIDER_ERROR",
            SnapshotError::Config { .. } => "CONFIG_ERROR",
            SnapshotError::Serialization { .. } => "SERIALIZATION_ERROR",
            SnapshotError::Cancelled { .. } => "CANCELLED",
            SnapshotError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Check if this error is worth retrying against the provider
    pub fn is_retryable(&self) -> bool {
        matches!(self, SnapshotError::TransientProvider { .. })
    }

    /// Reason recorded on a deletion attempt that ended with this error
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            SnapshotError::TransientProvider { .. } => FailureReason::TransientProvider,
            SnapshotError::Authorization { .. } => FailureReason::Authorization,
            SnapshotError::Cancelled { .. } => FailureReason::Cancelled,
            SnapshotError::NotFound { .. } => FailureReason::NotInInventory,
            _ => FailureReason::Provider,
        }
    }
}

impl IntoResponse for SnapshotError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "status": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

// Conversion implementations for external error types

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        SnapshotError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for SnapshotError {
    fn from(err: config::ConfigError) -> Self {
        SnapshotError::Config {
            message: err.to_string(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for SnapshotError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        SnapshotError::TransientProvider {
            operation: "provider call".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        SnapshotError::Provider {
            operation: "spawn".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<QueryRejection> for SnapshotError {
    fn from(rejection: QueryRejection) -> Self {
        SnapshotError::Validation {
            field: "query".to_string(),
            message: rejection.body_text(),
        }
    }
}

impl From<JsonRejection> for SnapshotError {
    fn from(rejection: JsonRejection) -> Self {
        SnapshotError::Validation {
            field: "body".to_string(),
            message: rejection.body_text(),
        }
    }
}

impl From<validator::ValidationErrors> for SnapshotError {
    fn from(err: validator::ValidationErrors) -> Self {
        let message = err
            .field_errors()
            .iter()
            .map(|(field, errors)| {
                let field_errors: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, field_errors.join(", "))
            })
            .collect::<Vec<String>>()
            .join("; ");

        SnapshotError::Validation {
            field: "multiple".to_string(),
            message,
        }
    }
}

// Utility functions for creating specific error types

impl SnapshotError {
    pub fn transient<S1: Into<String>, S2: Into<String>>(operation: S1, message: S2) -> Self {
        Self::TransientProvider {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn authorization<S: Into<String>>(message: S) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    pub fn lock_restoration<S1, S2, S3>(resource_group: S1, lock_name: S2, message: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::LockRestoration {
            resource_group: resource_group.into(),
            lock_name: lock_name.into(),
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn validation<S1: Into<String>, S2: Into<String>>(field: S1, message: S2) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn provider<S1: Into<String>, S2: Into<String>>(operation: S1, message: S2) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
