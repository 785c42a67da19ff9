//! Role administration handlers. All routes are admin only.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use garage_core::models::auth::User;
use garage_core::models::role::{NewRole, Role};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{AssignRoleRequest, MessageResponse, UpdateRoleRequest};

/// `GET /roles`
pub async fn list_roles_handler(State(state): State<AppState>) -> AppResult<Json<Vec<Role>>> {
    Ok(Json(state.auth.rbac().list_roles().await?))
}

/// `POST /roles`
pub async fn create_role_handler(
    State(state): State<AppState>,
    Json(body): Json<NewRole>,
) -> AppResult<(StatusCode, Json<Role>)> {
    let role = state.auth.rbac().create_role(body).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// `GET /roles/{id}`
pub async fn get_role_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Role>> {
    Ok(Json(state.auth.rbac().get_role_by_id(id).await?))
}

/// `PUT /roles/{id}` — update display fields, activity and permissions.
/// The name is a lookup key and cannot be changed.
pub async fn update_role_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateRoleRequest>,
) -> AppResult<Json<Role>> {
    let rbac = state.auth.rbac();
    let mut role = rbac.get_role_by_id(id).await?;
    if let Some(display_name) = body.display_name {
        role.display_name = display_name;
    }
    if let Some(description) = body.description {
        role.description = description;
    }
    if let Some(is_active) = body.is_active {
        role.is_active = is_active;
    }
    if let Some(permissions) = body.permissions {
        role.permissions = permissions;
    }
    rbac.update_role(&role).await?;
    Ok(Json(rbac.get_role_by_id(id).await?))
}

/// `DELETE /roles/{id}`
pub async fn delete_role_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    state.auth.rbac().delete_role(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /roles/{id}/users` — users holding the role.
pub async fn role_users_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<User>>> {
    let rbac = state.auth.rbac();
    let role = rbac.get_role_by_id(id).await?;
    Ok(Json(rbac.get_users_with_role(role.id).await?))
}

/// `GET /users/{id}/roles`
pub async fn user_roles_handler(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> AppResult<Json<Vec<Role>>> {
    state.auth.get_user(user_id).await?;
    Ok(Json(state.auth.rbac().get_user_roles(user_id).await?))
}

/// `POST /users/{id}/roles` — assign a role, stamped with the calling admin.
pub async fn assign_role_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(principal)): Extension<AuthenticatedUser>,
    Path(user_id): Path<i64>,
    Json(body): Json<AssignRoleRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    state.auth.get_user(user_id).await?;
    state
        .auth
        .rbac()
        .assign_role(user_id, body.role_id, principal.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(MessageResponse::new("Role assigned"))))
}

/// `DELETE /users/{id}/roles/{role_id}`
pub async fn remove_role_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(principal)): Extension<AuthenticatedUser>,
    Path((user_id, role_id)): Path<(i64, i64)>,
) -> AppResult<StatusCode> {
    let rbac = state.auth.rbac();
    let role = rbac.get_role_by_id(role_id).await?;
    if user_id == principal.user_id && role.name == garage_core::models::role::ROLE_ADMIN {
        return Err(AppError::Validation(
            "Administrators cannot remove their own admin role".into(),
        ));
    }
    rbac.remove_role(user_id, role.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
