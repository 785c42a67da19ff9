//! Authentication middleware: Bearer token extraction and role guard.

use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use garage_core::models::auth::Principal;
use tracing::debug;

use crate::AppState;
use crate::error::AppError;

/// Key used to store the caller's [`Principal`] in request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Principal);

/// Axum middleware: extracts `Authorization: Bearer <token>`, validates it as
/// an access token, and injects `AuthenticatedUser` into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))?;

    let principal = state.auth.authorize(token).await?;
    request.extensions_mut().insert(AuthenticatedUser(principal));

    Ok(next.run(request).await)
}

/// Axum middleware: admits only callers who currently hold the admin role.
///
/// Must run after [`require_auth`]. The role is checked against the store,
/// not the token snapshot, so a revoked admin is refused immediately.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_id = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.0.user_id)
        .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;

    if !state.auth.rbac().is_admin(user_id).await? {
        debug!(user_id, "admin route refused");
        return Err(AppError::Forbidden("Administrator role required".into()));
    }

    Ok(next.run(request).await)
}
