//! Error handling for the Ceramic Production Inventory service
//!
//! Provides consistent error responses in English and Spanish. Stock rejections
//! carry the structured `details` block that clients render verbatim.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::{StockError, StockShortfall};
use thiserror::Error;

/// SQLSTATE codes that mean "another writer got there first, try again"
const CONCURRENCY_SQLSTATES: [&str; 4] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available (lock_timeout)
    "57014", // query_canceled (statement_timeout)
];

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Validation errors
    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business logic errors
    #[error("Insufficient stock: {0:?}")]
    InsufficientStock(StockShortfall),

    #[error("Over-allocation: {0:?}")]
    OverAllocation(StockShortfall),

    #[error("Concurrent update conflict")]
    ConcurrencyConflict,

    // Database errors
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(code) = db_err.code() {
                let code: &str = &code;
                if CONCURRENCY_SQLSTATES.contains(&code) {
                    tracing::debug!(sqlstate = code, "Transaction lost a lock race: {}", db_err);
                    return AppError::ConcurrencyConflict;
                }
            }
        }
        AppError::Database(err)
    }
}

impl From<StockError> for AppError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::Invalid { field, message } => AppError::validation(field, message),
            StockError::InsufficientStock(detail) => AppError::InsufficientStock(detail),
            StockError::OverAllocation(detail) => AppError::OverAllocation(detail),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by_key(|(field, _)| *field);

        match fields.first() {
            Some((field, field_errors)) => {
                let message = field_errors
                    .first()
                    .and_then(|e| e.message.as_ref())
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for {}", field));
                AppError::validation(*field, message)
            }
            None => AppError::validation("body", "Invalid request body"),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::validation("body", rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::validation("path", rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::validation("query", rejection.body_text())
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message_es: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<StockShortfall>,
}

impl ErrorResponse {
    pub fn new(code: &str, error: impl Into<String>, message_es: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message_es: message_es.into(),
            code: code.to_string(),
            field: None,
            details: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("UNAUTHORIZED", message.clone(), "No autorizado"),
            ),
            AppError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    field: Some(field.clone()),
                    ..ErrorResponse::new(
                        "VALIDATION_ERROR",
                        message.clone(),
                        format!("Datos no válidos: {}", message),
                    )
                },
            ),
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::new(
                    "NOT_FOUND",
                    format!("{} not found", resource),
                    format!("No se encontró {}", resource),
                ),
            ),
            AppError::InsufficientStock(detail) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    details: Some(detail.clone()),
                    ..ErrorResponse::new(
                        "INSUFFICIENT_STOCK",
                        format!(
                            "Insufficient stock of {} at {}: {} available, {} requested",
                            detail.product_name, detail.stage, detail.available, detail.requested
                        ),
                        format!(
                            "Stock insuficiente de {} en {}: faltan {}",
                            detail.product_name, detail.stage, detail.missing
                        ),
                    )
                },
            ),
            AppError::OverAllocation(detail) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    details: Some(detail.clone()),
                    ..ErrorResponse::new(
                        "OVER_ALLOCATION",
                        format!(
                            "Line item for {} only needs {} more, {} requested",
                            detail.product_name, detail.available, detail.requested
                        ),
                        format!(
                            "El pedido de {} solo necesita {} más",
                            detail.product_name, detail.available
                        ),
                    )
                },
            ),
            AppError::ConcurrencyConflict => (
                StatusCode::CONFLICT,
                ErrorResponse::new(
                    "CONCURRENCY_CONFLICT",
                    "The stock was modified concurrently, please retry",
                    "El stock fue modificado al mismo tiempo, intente de nuevo",
                ),
            ),
            AppError::Database(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(
                    "INTERNAL_ERROR",
                    "An internal server error occurred",
                    "Ocurrió un error interno del servidor",
                ),
            ),
        };

        if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
        } else if status == StatusCode::CONFLICT {
            tracing::warn!("Error: {}", self);
        } else {
            tracing::debug!("Rejected request: {}", self);
        }

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers and services
pub type AppResult<T> = Result<T, AppError>;
