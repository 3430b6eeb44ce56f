//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use utoipa::ToSchema;

/// Numeric application error codes carried in every error envelope.
pub mod codes {
    pub const INTERNAL: u32 = 1000;
    pub const DATABASE: u32 = 1001;
    pub const CONFIG: u32 = 1002;
    pub const BAD_REQUEST: u32 = 1100;
    pub const VALIDATION: u32 = 1101;
    pub const UNAUTHORIZED: u32 = 1200;
    pub const FORBIDDEN: u32 = 1201;
    pub const CONFLICT: u32 = 1300;
    pub const DUPLICATE: u32 = 1301;
    /// Fallback for resources that do not declare their own not-found code.
    pub const NOT_FOUND: u32 = 1400;
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} id '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("unknown column '{column}' on resource {resource}")]
    UnknownColumn { resource: String, column: String },
    #[error("duplicate path segment: {0}")]
    DuplicatePathSegment(String),
    #[error("catalog load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Field name -> messages. Ordered so error payloads are stable.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String, code: u32 },
    #[error("validation failed")]
    Validation(FieldErrors),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("conflict: {message}")]
    Conflict {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    /// Single-field validation error.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.into(), vec![message.into()]);
        AppError::Validation(errors)
    }

    pub fn conflict(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        AppError::Conflict {
            message: message.into(),
            details,
        }
    }

    /// HTTP status, numeric code and kind label for this error.
    pub fn classify(&self) -> (StatusCode, u32, &'static str) {
        match self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, codes::CONFIG, "config_error"),
            AppError::NotFound { code, .. } => (StatusCode::NOT_FOUND, *code, "not_found"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, codes::VALIDATION, "validation_error"),
            AppError::Db(e) => match e {
                sqlx::Error::RowNotFound => (StatusCode::NOT_FOUND, codes::NOT_FOUND, "not_found"),
                sqlx::Error::Database(db) => match db.code().as_deref() {
                    Some("23505") => (StatusCode::CONFLICT, codes::DUPLICATE, "duplicate"),
                    Some("23503") => (StatusCode::CONFLICT, codes::CONFLICT, "conflict"),
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, codes::DATABASE, "database_error"),
                },
                _ => (StatusCode::INTERNAL_SERVER_ERROR, codes::DATABASE, "database_error"),
            },
            AppError::Conflict { .. } => (StatusCode::CONFLICT, codes::CONFLICT, "conflict"),
            AppError::Duplicate(_) => (StatusCode::CONFLICT, codes::DUPLICATE, "duplicate"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, codes::BAD_REQUEST, "bad_request"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, codes::UNAUTHORIZED, "unauthorized"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, codes::FORBIDDEN, "forbidden"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL, "internal_error"),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorDetail {
    pub code: u32,
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, kind) = self.classify();
        if status.is_server_error() {
            tracing::error!(error = %self, code, "request failed");
        }
        let details = match &self {
            AppError::Validation(fields) => serde_json::to_value(fields).ok(),
            AppError::Conflict { details, .. } => details.clone(),
            _ => None,
        };
        let message = match &self {
            // Do not leak SQL text to clients.
            AppError::Db(_) if status.is_server_error() => "database error".to_string(),
            _ => self.to_string(),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code,
                kind: kind.to_string(),
                message,
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request_with_field_details() {
        let err = AppError::field("title", "title is required");
        let (status, code, kind) = err.classify();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, codes::VALIDATION);
        assert_eq!(kind, "validation_error");
    }

    #[test]
    fn not_found_keeps_resource_code() {
        let err = AppError::NotFound {
            resource: "resident".into(),
            id: "7".into(),
            code: 1410,
        };
        assert_eq!(err.classify().1, 1410);
        assert_eq!(err.to_string(), "resident not found: 7");
    }

    #[test]
    fn row_not_found_is_not_a_server_error() {
        let (status, _, _) = AppError::Db(sqlx::Error::RowNotFound).classify();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
