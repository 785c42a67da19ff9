//! Persistence interfaces for users, roles and role assignments.
//!
//! The orchestrator and RBAC engine depend only on these traits. Two
//! backends are provided: [`postgres::PgStore`] and [`memory::MemoryStore`].

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::auth::{NewUser, User};
use crate::models::role::{NewRole, Role};

/// Store errors. `NotFound` is always distinct from backend failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. `Conflict` when the email or Telegram id is taken.
    async fn create_user(&self, user: NewUser) -> Result<User>;

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn get_user_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Persist mutable fields of an existing user. `NotFound` if absent.
    async fn update_user(&self, user: &User) -> Result<()>;

    /// Soft-delete (deactivate) a user. `NotFound` if absent.
    async fn delete_user(&self, id: i64) -> Result<()>;

    /// Remove a user row and its role assignments for good. Only used to undo
    /// a signup that failed halfway. `NotFound` if absent.
    async fn purge_user(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Insert a role. `Conflict` when the name is taken.
    async fn create_role(&self, role: NewRole) -> Result<Role>;

    async fn get_role_by_id(&self, id: i64) -> Result<Option<Role>>;

    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>>;

    async fn list_roles(&self) -> Result<Vec<Role>>;

    async fn update_role(&self, role: &Role) -> Result<()>;

    async fn delete_role(&self, id: i64) -> Result<()>;

    /// Create an active assignment. `Conflict` if one is already active for
    /// the `(user_id, role_id)` pair.
    async fn create_assignment(&self, user_id: i64, role_id: i64, assigned_by: i64) -> Result<()>;

    /// Deactivate the active assignment, returning whether one existed.
    async fn deactivate_assignment(&self, user_id: i64, role_id: i64) -> Result<bool>;

    async fn has_active_assignment(&self, user_id: i64, role_id: i64) -> Result<bool>;

    /// Roles with an active assignment for the user.
    async fn roles_for_user(&self, user_id: i64) -> Result<Vec<Role>>;

    /// Users with an active assignment of the role.
    async fn users_with_role(&self, role_id: i64) -> Result<Vec<User>>;
}
