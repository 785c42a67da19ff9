//! Role-based access control.
//!
//! [`RbacEngine`] owns role definitions and the user↔role assignment
//! relation. Role checks always go to the store, so they reflect
//! assignments made after a token was issued.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::auth::{AuthError, DEFAULT_DEPENDENCY_TIMEOUT, bounded};
use crate::models::auth::User;
use crate::models::role::{NewRole, ROLE_ADMIN, ROLE_BARBER, ROLE_CLIENT, Role, builtin_roles};
use crate::store::RoleStore;

type Result<T> = std::result::Result<T, AuthError>;

#[derive(Clone)]
pub struct RbacEngine {
    roles: Arc<dyn RoleStore>,
    timeout: Duration,
}

impl RbacEngine {
    pub fn new(roles: Arc<dyn RoleStore>) -> Self {
        Self {
            roles,
            timeout: DEFAULT_DEPENDENCY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    // -------------------------------------------------------------------------
    // Role CRUD
    // -------------------------------------------------------------------------

    pub async fn create_role(&self, role: NewRole) -> Result<Role> {
        if role.name.trim().is_empty() {
            return Err(AuthError::Validation("role name must not be empty".into()));
        }
        bounded(self.timeout, self.roles.create_role(role))
            .await
            .map_err(|e| match e {
                AuthError::Conflict(_) => AuthError::Conflict("role name already exists".into()),
                other => other,
            })
    }

    pub async fn get_role_by_id(&self, id: i64) -> Result<Role> {
        bounded(self.timeout, self.roles.get_role_by_id(id))
            .await?
            .ok_or(AuthError::RoleNotFound)
    }

    /// Primary lookup for bootstrap and assignment. `RoleNotFound` when absent.
    pub async fn get_role_by_name(&self, name: &str) -> Result<Role> {
        bounded(self.timeout, self.roles.get_role_by_name(name))
            .await?
            .ok_or(AuthError::RoleNotFound)
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        bounded(self.timeout, self.roles.list_roles()).await
    }

    pub async fn update_role(&self, role: &Role) -> Result<()> {
        bounded(self.timeout, self.roles.update_role(role))
            .await
            .map_err(not_found_as_role)
    }

    pub async fn delete_role(&self, id: i64) -> Result<()> {
        bounded(self.timeout, self.roles.delete_role(id))
            .await
            .map_err(not_found_as_role)
    }

    // -------------------------------------------------------------------------
    // Assignments
    // -------------------------------------------------------------------------

    /// Give `user_id` the role `role_id`, stamped with `assigned_by`.
    ///
    /// The store's uniqueness on active `(user, role)` pairs settles races
    /// between concurrent assignments; its conflict is reported as
    /// `AlreadyAssigned` like the pre-check.
    pub async fn assign_role(&self, user_id: i64, role_id: i64, assigned_by: i64) -> Result<()> {
        let role = self.get_role_by_id(role_id).await?;
        if self.has_role(user_id, &role.name).await? {
            return Err(AuthError::AlreadyAssigned);
        }
        match bounded(
            self.timeout,
            self.roles.create_assignment(user_id, role.id, assigned_by),
        )
        .await
        {
            Ok(()) => {
                info!(user_id, role = %role.name, assigned_by, "role assigned");
                Ok(())
            }
            Err(AuthError::Conflict(_)) => Err(AuthError::AlreadyAssigned),
            Err(e) => Err(e),
        }
    }

    /// Deactivate the assignment. Removing a role the user doesn't hold is a
    /// no-op.
    pub async fn remove_role(&self, user_id: i64, role_id: i64) -> Result<()> {
        let removed = bounded(
            self.timeout,
            self.roles.deactivate_assignment(user_id, role_id),
        )
        .await?;
        if removed {
            info!(user_id, role_id, "role removed");
        } else {
            debug!(user_id, role_id, "no active assignment to remove");
        }
        Ok(())
    }

    /// Whether the user actively holds `role_name`. Unknown names are `false`.
    pub async fn has_role(&self, user_id: i64, role_name: &str) -> Result<bool> {
        let Some(role) = bounded(self.timeout, self.roles.get_role_by_name(role_name)).await? else {
            return Ok(false);
        };
        bounded(
            self.timeout,
            self.roles.has_active_assignment(user_id, role.id),
        )
        .await
    }

    pub async fn has_any_role(&self, user_id: i64, role_names: &[&str]) -> Result<bool> {
        for name in role_names {
            if self.has_role(user_id, name).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn has_all_roles(&self, user_id: i64, role_names: &[&str]) -> Result<bool> {
        for name in role_names {
            if !self.has_role(user_id, name).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn get_user_roles(&self, user_id: i64) -> Result<Vec<Role>> {
        bounded(self.timeout, self.roles.roles_for_user(user_id)).await
    }

    pub async fn get_users_with_role(&self, role_id: i64) -> Result<Vec<User>> {
        bounded(self.timeout, self.roles.users_with_role(role_id)).await
    }

    /// Names of the user's active roles, as embedded in token claims.
    pub async fn role_names(&self, user_id: i64) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .get_user_roles(user_id)
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        Ok(names)
    }

    pub async fn is_admin(&self, user_id: i64) -> Result<bool> {
        self.has_role(user_id, ROLE_ADMIN).await
    }

    pub async fn is_barber(&self, user_id: i64) -> Result<bool> {
        self.has_role(user_id, ROLE_BARBER).await
    }

    pub async fn is_client(&self, user_id: i64) -> Result<bool> {
        self.has_role(user_id, ROLE_CLIENT).await
    }

    /// Whether any active role held by the user allows `action` on `resource`.
    pub async fn has_permission(&self, user_id: i64, resource: &str, action: &str) -> Result<bool> {
        Ok(self
            .get_user_roles(user_id)
            .await?
            .iter()
            .filter(|r| r.is_active)
            .any(|r| r.permissions.allows(resource, action)))
    }

    // -------------------------------------------------------------------------
    // Bootstrap
    // -------------------------------------------------------------------------

    /// Make sure `admin`, `barber` and `client` exist. Safe to run on every
    /// start; existing roles are left untouched.
    pub async fn ensure_builtin_roles(&self) -> Result<()> {
        for role in builtin_roles() {
            let name = role.name.clone();
            if bounded(self.timeout, self.roles.get_role_by_name(&name))
                .await?
                .is_some()
            {
                debug!(role = %name, "built-in role present");
                continue;
            }
            match bounded(self.timeout, self.roles.create_role(role)).await {
                Ok(created) => info!(role = %created.name, id = created.id, "created built-in role"),
                // Another instance won the race.
                Err(AuthError::Conflict(_)) => debug!(role = %name, "built-in role present"),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn not_found_as_role(e: AuthError) -> AuthError {
    match e {
        AuthError::NotFound(_) => AuthError::RoleNotFound,
        other => other,
    }
}
