//! Error handling
//!
//! `AppError` is the one domain/wire error type for the whole service — it
//! is what subsystem operations return and what handlers propagate with `?`.
//! Each variant maps to exactly one of the closed error codes the agent and
//! control-plane contracts promise: `UNAUTHORIZED`, `FORBIDDEN`,
//! `RESOURCE_NOT_FOUND`, `INVALID_REQUEST`, `INVALID_STATE`, `RATE_LIMITED`,
//! `RISK_PAUSED`, `SESSION_INVALID`, `INTERNAL_ERROR`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    // Authentication / authorization
    InvalidCredentials,
    TokenExpired,
    TokenInvalid,
    Unauthorized,
    Forbidden,

    // Resource errors
    NotFound(String),
    AlreadyExists(String),

    // Input validation
    ValidationError(String),

    // Job/agent state machine violations
    InvalidState(String),

    // Risk Oracle veto, surfaced synchronously
    RiskPaused(String),

    // Account session no longer usable
    SessionInvalid(String),

    // Rate limit rule exceeded
    RateLimited(String),

    // Database errors
    DatabaseError(String),

    // Generic errors
    InternalError(String),
}

impl AppError {
    fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidCredentials
            | AppError::TokenExpired
            | AppError::TokenInvalid
            | AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound(_) => "RESOURCE_NOT_FOUND",
            AppError::AlreadyExists(_) | AppError::ValidationError(_) => "INVALID_REQUEST",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::RateLimited(_) => "RATE_LIMITED",
            AppError::RiskPaused(_) => "RISK_PAUSED",
            AppError::SessionInvalid(_) => "SESSION_INVALID",
            AppError::DatabaseError(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message): (StatusCode, String) = match &self {
            AppError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "Invalid email or password".into())
            }
            AppError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token has expired".into()),
            AppError::TokenInvalid => (StatusCode::UNAUTHORIZED, "Invalid token".into()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required".into()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Access denied".into()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::AlreadyExists(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InvalidState(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::RateLimited(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            AppError::RiskPaused(reason) => (StatusCode::SERVICE_UNAVAILABLE, reason.clone()),
            AppError::SessionInvalid(reason) => (StatusCode::SERVICE_UNAVAILABLE, reason.clone()),
            AppError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error occurred".into())
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };

        let body = Json(json!({
            "errorCode": self.error_code(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        AppError::TokenInvalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_variant_maps_to_its_closed_error_code() {
        assert_eq!(AppError::Unauthorized.error_code(), "UNAUTHORIZED");
        assert_eq!(AppError::TokenExpired.error_code(), "UNAUTHORIZED");
        assert_eq!(AppError::Forbidden.error_code(), "FORBIDDEN");
        assert_eq!(AppError::NotFound("x".into()).error_code(), "RESOURCE_NOT_FOUND");
        assert_eq!(AppError::ValidationError("x".into()).error_code(), "INVALID_REQUEST");
        assert_eq!(AppError::AlreadyExists("x".into()).error_code(), "INVALID_REQUEST");
        assert_eq!(AppError::InvalidState("x".into()).error_code(), "INVALID_STATE");
        assert_eq!(AppError::RateLimited("x".into()).error_code(), "RATE_LIMITED");
        assert_eq!(AppError::RiskPaused("x".into()).error_code(), "RISK_PAUSED");
        assert_eq!(AppError::SessionInvalid("x".into()).error_code(), "SESSION_INVALID");
        assert_eq!(AppError::DatabaseError("x".into()).error_code(), "INTERNAL_ERROR");
        assert_eq!(AppError::InternalError("x".into()).error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn sqlx_errors_convert_into_a_database_error() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::DatabaseError(_)));
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }
}
