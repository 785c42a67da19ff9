//! Authentication request handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use garage_core::models::auth::{DirectRegistration, TelegramAuthData};
use garage_core::models::role::{ROLE_BARBER, ROLE_CLIENT, UserWithRoles};

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    CreateBarberRequest, LoginRequest, MessageResponse, RefreshRequest, RegisterRequest,
    TokenResponse,
};

/// `POST /auth/telegram` — log in with a Telegram login-widget payload.
pub async fn telegram_handler(
    State(state): State<AppState>,
    Json(body): Json<TelegramAuthData>,
) -> AppResult<Json<TokenResponse>> {
    let pair = state.auth.authenticate_external(&body).await?;
    Ok(Json(pair.into()))
}

/// `POST /auth/register` — create a client account.
///
/// Asking for the barber role here is refused; barbers are created through
/// `POST /admin/barbers`.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    let registration = DirectRegistration {
        email: body.email,
        password: body.password,
        first_name: body.first_name,
        last_name: body.last_name,
        role: body.role.unwrap_or_else(|| ROLE_CLIENT.to_string()),
    };
    let pair = state.auth.register_direct(registration, None).await?;
    Ok((StatusCode::CREATED, Json(pair.into())))
}

/// `POST /auth/login` — authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let pair = state.auth.login_direct(&body.email, &body.password).await?;
    Ok(Json(pair.into()))
}

/// `POST /auth/refresh` — exchange a refresh token for a new token pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let pair = state.auth.refresh_tokens(&body.refresh_token).await?;
    Ok(Json(pair.into()))
}

/// `POST /auth/logout` — revoke the caller's refresh token.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(principal)): Extension<AuthenticatedUser>,
) -> AppResult<Json<MessageResponse>> {
    state.auth.logout(principal.user_id).await?;
    Ok(Json(MessageResponse::new("Logged out")))
}

/// `GET /auth/me` — the caller's profile and active roles.
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(principal)): Extension<AuthenticatedUser>,
) -> AppResult<Json<UserWithRoles>> {
    let user = state.auth.get_user_with_roles(principal.user_id).await?;
    Ok(Json(user))
}

/// `POST /admin/barbers` — register a barber account. Admin only.
pub async fn create_barber_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(principal)): Extension<AuthenticatedUser>,
    Json(body): Json<CreateBarberRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    let registration = DirectRegistration {
        email: body.email,
        password: body.password,
        first_name: body.first_name,
        last_name: body.last_name,
        role: ROLE_BARBER.to_string(),
    };
    let pair = state
        .auth
        .register_direct(registration, Some(principal.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(pair.into())))
}
