//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use garage_core::auth::AuthError;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

fn auth_status(e: &AuthError) -> StatusCode {
    match e {
        AuthError::AuthInvalid
        | AuthError::InvalidCredentials
        | AuthError::InvalidToken(_)
        | AuthError::WrongTokenType
        | AuthError::Expired
        | AuthError::RevokedOrUnknown
        | AuthError::StaleToken => StatusCode::UNAUTHORIZED,
        AuthError::EmailTaken | AuthError::AlreadyAssigned | AuthError::Conflict(_) => {
            StatusCode::CONFLICT
        }
        AuthError::RoleNotFound | AuthError::NotFound(_) => StatusCode::NOT_FOUND,
        AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
        AuthError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        AuthError::HashingFailure(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.clone()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.clone()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.clone()),
            AppError::Auth(e) => {
                let status = auth_status(e);
                let message = if status.is_server_error() {
                    if e.is_retryable() {
                        warn!(error = %e, "dependency failure");
                        "Service temporarily unavailable".to_string()
                    } else {
                        error!(error = %e, "request failed");
                        "Internal server error".to_string()
                    }
                } else {
                    e.to_string()
                };
                (status, e.code(), message)
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn credential_failures_are_unauthorized() {
        for e in [
            AuthError::InvalidCredentials,
            AuthError::AuthInvalid,
            AuthError::WrongTokenType,
            AuthError::Expired,
            AuthError::StaleToken,
        ] {
            assert_eq!(auth_status(&e), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn dependency_failures_are_retryable_statuses() {
        assert_eq!(
            auth_status(&AuthError::Unavailable("redis".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            auth_status(&AuthError::Timeout(Duration::from_secs(5))),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn conflicts() {
        assert_eq!(auth_status(&AuthError::EmailTaken), StatusCode::CONFLICT);
        assert_eq!(auth_status(&AuthError::AlreadyAssigned), StatusCode::CONFLICT);
    }
}
