//! Role and role-assignment models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::auth::User;

/// Built-in role names seeded at bootstrap.
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_BARBER: &str = "barber";
pub const ROLE_CLIENT: &str = "client";

/// Permission descriptor: resource name → allowed actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(pub BTreeMap<String, Vec<String>>);

impl Permissions {
    /// Build a descriptor from `(resource, actions)` pairs.
    pub fn from_pairs(pairs: &[(&str, &[&str])]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(resource, actions)| {
                    (
                        resource.to_string(),
                        actions.iter().map(|a| a.to_string()).collect(),
                    )
                })
                .collect(),
        )
    }

    pub fn allows(&self, resource: &str, action: &str) -> bool {
        self.0
            .get(resource)
            .is_some_and(|actions| actions.iter().any(|a| a == action))
    }
}

/// Named permission bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub is_active: bool,
    pub permissions: Permissions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insertable role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub permissions: Permissions,
}

fn default_active() -> bool {
    true
}

/// Link between a user and a role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    pub user_id: i64,
    pub role_id: i64,
    pub assigned_by: i64,
    pub assigned_at: DateTime<Utc>,
    pub is_active: bool,
}

/// A user together with its active roles.
#[derive(Debug, Clone, Serialize)]
pub struct UserWithRoles {
    pub user: User,
    pub roles: Vec<Role>,
}

/// Descriptors of the three roles every deployment starts with.
pub fn builtin_roles() -> Vec<NewRole> {
    const CRUD: &[&str] = &["create", "read", "update", "delete"];
    vec![
        NewRole {
            name: ROLE_ADMIN.into(),
            display_name: "Administrator".into(),
            description: "Full access to the system".into(),
            is_active: true,
            permissions: Permissions::from_pairs(&[
                ("users", CRUD),
                ("barbers", CRUD),
                ("appointments", CRUD),
            ]),
        },
        NewRole {
            name: ROLE_BARBER.into(),
            display_name: "Barber".into(),
            description: "Manages appointments and own profile".into(),
            is_active: true,
            permissions: Permissions::from_pairs(&[
                ("appointments", &["create", "read", "update"]),
                ("profile", &["read", "update"]),
            ]),
        },
        NewRole {
            name: ROLE_CLIENT.into(),
            display_name: "Client".into(),
            description: "Books services".into(),
            is_active: true,
            permissions: Permissions::from_pairs(&[
                ("appointments", &["create", "read"]),
                ("profile", &["read", "update"]),
            ]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_serialize_as_plain_map() {
        let p = Permissions::from_pairs(&[("profile", &["read"])]);
        assert_eq!(
            serde_json::to_string(&p).unwrap(),
            r#"{"profile":["read"]}"#
        );
    }

    #[test]
    fn builtin_descriptors() {
        let roles = builtin_roles();
        let names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, [ROLE_ADMIN, ROLE_BARBER, ROLE_CLIENT]);

        let client = &roles[2].permissions;
        assert!(client.allows("appointments", "create"));
        assert!(!client.allows("appointments", "delete"));
        assert!(roles[0].permissions.allows("users", "delete"));
    }
}
