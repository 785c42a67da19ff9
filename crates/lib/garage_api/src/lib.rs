//! # garage_api
//!
//! HTTP API library for Garage.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use garage_core::auth::service::AuthService;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ApiConfig;
use crate::handlers::{auth, roles};
use crate::middleware::auth::{require_admin, require_auth};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Authentication and RBAC service.
    pub auth: Arc<AuthService>,
    /// API configuration.
    pub config: ApiConfig,
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route("/auth/telegram", post(auth::telegram_handler))
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler));

    // Protected routes (require auth)
    let protected = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route("/auth/me", get(auth::me_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    // Admin routes: require_auth runs first (outermost layer).
    let admin = Router::new()
        .route("/admin/barbers", post(auth::create_barber_handler))
        .route(
            "/roles",
            get(roles::list_roles_handler).post(roles::create_role_handler),
        )
        .route(
            "/roles/{id}",
            get(roles::get_role_handler)
                .put(roles::update_role_handler)
                .delete(roles::delete_role_handler),
        )
        .route("/roles/{id}/users", get(roles::role_users_handler))
        .route(
            "/users/{id}/roles",
            get(roles::user_roles_handler).post(roles::assign_role_handler),
        )
        .route(
            "/users/{id}/roles/{role_id}",
            axum::routing::delete(roles::remove_role_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(admin)
        .layer(cors)
        .with_state(state)
}
