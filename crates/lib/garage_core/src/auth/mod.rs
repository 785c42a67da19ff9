//! Authentication and authorization logic.
//!
//! Provides credential verification (Telegram assertions, bcrypt passwords),
//! JWT issuance and validation, the refresh-token store, and the
//! [`service::AuthService`] orchestrator that composes them with the RBAC
//! engine.

pub mod jwt;
pub mod password;
pub mod refresh_store;
pub mod service;
pub mod telegram;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid external authentication")]
    AuthInvalid,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Role not found")]
    RoleNotFound,

    #[error("Role already assigned")]
    AlreadyAssigned,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Wrong token type")]
    WrongTokenType,

    #[error("Token expired")]
    Expired,

    #[error("Refresh token revoked or unknown")]
    RevokedOrUnknown,

    #[error("Refresh token already rotated")]
    StaleToken,

    #[error("Dependency unavailable: {0}")]
    Unavailable(String),

    #[error("Dependency timed out after {0:?}")]
    Timeout(Duration),

    #[error("Password hashing failed: {0}")]
    HashingFailure(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Stable machine-readable code for the outer layer.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::AuthInvalid => "auth_invalid",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::EmailTaken => "email_taken",
            AuthError::RoleNotFound => "role_not_found",
            AuthError::AlreadyAssigned => "already_assigned",
            AuthError::InvalidToken(_) => "invalid_token",
            AuthError::WrongTokenType => "wrong_token_type",
            AuthError::Expired => "token_expired",
            AuthError::RevokedOrUnknown => "token_revoked",
            AuthError::StaleToken => "stale_token",
            AuthError::Unavailable(_) => "unavailable",
            AuthError::Timeout(_) => "timeout",
            AuthError::HashingFailure(_) => "hashing_failure",
            AuthError::Validation(_) => "validation_error",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::NotFound(_) => "not_found",
            AuthError::Conflict(_) => "conflict",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// Dependency failures are safe to retry; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Unavailable(_) | AuthError::Timeout(_))
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => AuthError::NotFound(what),
            StoreError::Conflict(what) => AuthError::Conflict(what),
            StoreError::Unavailable(msg) => AuthError::Unavailable(msg),
            StoreError::Database(e) => AuthError::Unavailable(e.to_string()),
        }
    }
}

/// Default bound on every cache/store call.
pub const DEFAULT_DEPENDENCY_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a store or cache call under `limit`, mapping an elapsed deadline to
/// [`AuthError::Timeout`].
pub(crate) async fn bounded<T, E, F>(limit: Duration, call: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, E>>,
    AuthError: From<E>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(AuthError::from),
        Err(_) => Err(AuthError::Timeout(limit)),
    }
}

/// Secrets and limits injected into [`service::AuthService`].
#[derive(Clone)]
pub struct AuthSettings {
    /// HS256 signing secret for JWTs.
    pub jwt_secret: String,
    /// Shared secret for Telegram login-widget signatures.
    pub telegram_secret: String,
    /// Deadline applied to each external call.
    pub dependency_timeout: Duration,
}

impl AuthSettings {
    pub fn new(jwt_secret: impl Into<String>, telegram_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            telegram_secret: telegram_secret.into(),
            dependency_timeout: DEFAULT_DEPENDENCY_TIMEOUT,
        }
    }

    pub fn with_dependency_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_timeout = timeout;
        self
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &"<redacted>")
            .field("telegram_secret", &"<redacted>")
            .field("dependency_timeout", &self.dependency_timeout)
            .finish()
    }
}
