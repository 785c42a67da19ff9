//! PostgreSQL-backed user/role store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Encode, PgPool, Postgres, Type};

use super::{Result, RoleStore, StoreError, UserStore};
use crate::models::auth::{AuthMethod, NewUser, User};
use crate::models::role::{NewRole, Permissions, Role};

const USER_COLUMNS: &str = "id, telegram_id, email, username, first_name, last_name, phone, \
                            password_hash, auth_method, is_active, created_at, updated_at";

const ROLE_COLUMNS: &str =
    "id, name, display_name, description, is_active, permissions, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    telegram_id: Option<i64>,
    email: Option<String>,
    username: Option<String>,
    first_name: String,
    last_name: String,
    phone: Option<String>,
    password_hash: Option<String>,
    auth_method: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self> {
        let auth_method = AuthMethod::parse(&row.auth_method).ok_or_else(|| {
            StoreError::Unavailable(format!("unknown auth_method '{}'", row.auth_method))
        })?;
        Ok(User {
            id: row.id,
            telegram_id: row.telegram_id,
            email: row.email,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            password_hash: row.password_hash,
            auth_method,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: i64,
    name: String,
    display_name: String,
    description: String,
    is_active: bool,
    permissions: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RoleRow> for Role {
    type Error = StoreError;

    fn try_from(row: RoleRow) -> Result<Self> {
        let permissions: Permissions = serde_json::from_str(&row.permissions).map_err(|e| {
            StoreError::Unavailable(format!("role {} has invalid permissions: {e}", row.name))
        })?;
        Ok(Role {
            id: row.id,
            name: row.name,
            display_name: row.display_name,
            description: row.description,
            is_active: row.is_active,
            permissions,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn encode_permissions(permissions: &Permissions) -> Result<String> {
    serde_json::to_string(permissions)
        .map_err(|e| StoreError::Unavailable(format!("encode permissions: {e}")))
}

/// Classify sqlx failures: unique violations become `Conflict`, connectivity
/// problems `Unavailable`.
fn map_sqlx(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            StoreError::Conflict(db.constraint().unwrap_or("unique").to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Database(other),
    }
}

/// User and role store over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_user<'q, K>(&self, sql: &'q str, key: K) -> Result<Option<User>>
    where
        K: 'q + Send + Encode<'q, Postgres> + Type<Postgres>,
    {
        let row = sqlx::query_as::<_, UserRow>(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(User::try_from).transpose()
    }

    async fn fetch_role<'q, K>(&self, sql: &'q str, key: K) -> Result<Option<Role>>
    where
        K: 'q + Send + Encode<'q, Postgres> + Type<Postgres>,
    {
        let row = sqlx::query_as::<_, RoleRow>(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(Role::try_from).transpose()
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let sql = format!(
            "INSERT INTO users (telegram_id, email, username, first_name, last_name, \
             password_hash, auth_method) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user.telegram_id)
            .bind(&user.email)
            .bind(&user.username)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.password_hash)
            .bind(user.auth_method.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        User::try_from(row)
    }

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        self.fetch_user(&sql, id).await
    }

    async fn get_user_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id = $1");
        self.fetch_user(&sql, telegram_id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)");
        self.fetch_user(&sql, email).await
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET telegram_id = $2, email = $3, username = $4, first_name = $5, \
             last_name = $6, phone = $7, password_hash = $8, is_active = $9, updated_at = now() \
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(user.telegram_id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> Result<()> {
        let result =
            sqlx::query("UPDATE users SET is_active = FALSE, updated_at = now() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    async fn purge_user(&self, id: i64) -> Result<()> {
        // user_roles rows go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RoleStore for PgStore {
    async fn create_role(&self, role: NewRole) -> Result<Role> {
        let sql = format!(
            "INSERT INTO roles (name, display_name, description, is_active, permissions) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {ROLE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, RoleRow>(&sql)
            .bind(&role.name)
            .bind(&role.display_name)
            .bind(&role.description)
            .bind(role.is_active)
            .bind(encode_permissions(&role.permissions)?)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Role::try_from(row)
    }

    async fn get_role_by_id(&self, id: i64) -> Result<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1");
        self.fetch_role(&sql, id).await
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1");
        self.fetch_role(&sql, name).await
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY id");
        let rows = sqlx::query_as::<_, RoleRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.into_iter().map(Role::try_from).collect()
    }

    async fn update_role(&self, role: &Role) -> Result<()> {
        let result = sqlx::query(
            "UPDATE roles SET name = $2, display_name = $3, description = $4, is_active = $5, \
             permissions = $6, updated_at = now() WHERE id = $1",
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.display_name)
        .bind(&role.description)
        .bind(role.is_active)
        .bind(encode_permissions(&role.permissions)?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("role {}", role.id)));
        }
        Ok(())
    }

    async fn delete_role(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("role {id}")));
        }
        Ok(())
    }

    async fn create_assignment(&self, user_id: i64, role_id: i64, assigned_by: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id, assigned_by, assigned_at, is_active) \
             VALUES ($1, $2, $3, now(), TRUE)",
        )
        .bind(user_id)
        .bind(role_id)
        .bind(assigned_by)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn deactivate_assignment(&self, user_id: i64, role_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE user_roles SET is_active = FALSE \
             WHERE user_id = $1 AND role_id = $2 AND is_active",
        )
        .bind(user_id)
        .bind(role_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn has_active_assignment(&self, user_id: i64, role_id: i64) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM user_roles \
             WHERE user_id = $1 AND role_id = $2 AND is_active)",
        )
        .bind(user_id)
        .bind(role_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn roles_for_user(&self, user_id: i64) -> Result<Vec<Role>> {
        let sql = format!(
            "SELECT {cols} FROM roles r \
             WHERE EXISTS (SELECT 1 FROM user_roles ur \
                           WHERE ur.role_id = r.id AND ur.user_id = $1 AND ur.is_active) \
             ORDER BY r.id",
            cols = prefixed(ROLE_COLUMNS, "r")
        );
        let rows = sqlx::query_as::<_, RoleRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.into_iter().map(Role::try_from).collect()
    }

    async fn users_with_role(&self, role_id: i64) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {cols} FROM users u \
             WHERE EXISTS (SELECT 1 FROM user_roles ur \
                           WHERE ur.user_id = u.id AND ur.role_id = $1 AND ur.is_active) \
             ORDER BY u.id",
            cols = prefixed(USER_COLUMNS, "u")
        );
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(role_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.into_iter().map(User::try_from).collect()
    }
}

/// Qualify a comma-separated column list with a table alias.
fn prefixed(columns: &str, alias: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_qualifies_every_column() {
        assert_eq!(prefixed("id, name,is_active", "r"), "r.id, r.name, r.is_active");
    }

    #[test]
    fn unknown_auth_method_is_rejected() {
        let now = Utc::now();
        let row = UserRow {
            id: 1,
            telegram_id: None,
            email: None,
            username: None,
            first_name: String::new(),
            last_name: String::new(),
            phone: None,
            password_hash: None,
            auth_method: "telegram".into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert!(User::try_from(row).is_err());
    }

    #[test]
    fn pool_timeout_is_unavailable() {
        assert!(matches!(
            map_sqlx(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
    }
}
