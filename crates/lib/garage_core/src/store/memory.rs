//! In-memory user/role store.
//!
//! Uniqueness (email, Telegram id, role name, active assignment) is enforced
//! through dashmap entry claims, so concurrent inserts behave like the unique
//! indexes of the PostgreSQL schema.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{Result, RoleStore, StoreError, UserStore};
use crate::models::auth::{NewUser, User};
use crate::models::role::{NewRole, Role, UserRoleAssignment};

#[derive(Debug, Default)]
pub struct MemoryStore {
    next_user_id: AtomicI64,
    next_role_id: AtomicI64,
    users: DashMap<i64, User>,
    emails: DashMap<String, i64>,
    telegram_ids: DashMap<i64, i64>,
    roles: DashMap<i64, Role>,
    role_names: DashMap<String, i64>,
    assignments: DashMap<(i64, i64), UserRoleAssignment>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim_email(&self, email: &str, user_id: i64) -> Result<()> {
        match self.emails.entry(email.to_lowercase()) {
            Entry::Occupied(e) if *e.get() != user_id => {
                Err(StoreError::Conflict(format!("email {email}")))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(v) => {
                v.insert(user_id);
                Ok(())
            }
        }
    }

    fn claim_telegram_id(&self, telegram_id: i64, user_id: i64) -> Result<()> {
        match self.telegram_ids.entry(telegram_id) {
            Entry::Occupied(e) if *e.get() != user_id => {
                Err(StoreError::Conflict(format!("telegram_id {telegram_id}")))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(v) => {
                v.insert(user_id);
                Ok(())
            }
        }
    }

    fn claim_role_name(&self, name: &str, role_id: i64) -> Result<()> {
        match self.role_names.entry(name.to_string()) {
            Entry::Occupied(e) if *e.get() != role_id => {
                Err(StoreError::Conflict(format!("role name {name}")))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(v) => {
                v.insert(role_id);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, new: NewUser) -> Result<User> {
        let id = self.next_user_id.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(email) = &new.email {
            self.claim_email(email, id)?;
        }
        if let Some(telegram_id) = new.telegram_id
            && let Err(e) = self.claim_telegram_id(telegram_id, id)
        {
            if let Some(email) = &new.email {
                self.emails.remove(&email.to_lowercase());
            }
            return Err(e);
        }

        let now = Utc::now();
        let user = User {
            id,
            telegram_id: new.telegram_id,
            email: new.email,
            username: new.username,
            first_name: new.first_name,
            last_name: new.last_name,
            phone: None,
            password_hash: new.password_hash,
            auth_method: new.auth_method,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(id, user.clone());
        Ok(user)
    }

    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn get_user_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>> {
        let Some(id) = self.telegram_ids.get(&telegram_id).map(|id| *id) else {
            return Ok(None);
        };
        self.get_user_by_id(id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let Some(id) = self.emails.get(&email.to_lowercase()).map(|id| *id) else {
            return Ok(None);
        };
        self.get_user_by_id(id).await
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let previous = self
            .users
            .get(&user.id)
            .map(|u| u.clone())
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user.id)))?;

        let email_changed = user.email.as_deref().map(str::to_lowercase)
            != previous.email.as_deref().map(str::to_lowercase);
        if let Some(email) = &user.email {
            self.claim_email(email, user.id)?;
        }
        if let Some(telegram_id) = user.telegram_id
            && let Err(e) = self.claim_telegram_id(telegram_id, user.id)
        {
            if let Some(email) = &user.email
                && email_changed
            {
                self.emails.remove(&email.to_lowercase());
            }
            return Err(e);
        }
        if let Some(old) = &previous.email
            && user.email.as_deref().map(str::to_lowercase) != Some(old.to_lowercase())
        {
            self.emails.remove(&old.to_lowercase());
        }
        if let Some(old) = previous.telegram_id
            && user.telegram_id != Some(old)
        {
            self.telegram_ids.remove(&old);
        }

        let mut updated = user.clone();
        updated.created_at = previous.created_at;
        updated.updated_at = Utc::now();
        self.users.insert(user.id, updated);
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> Result<()> {
        let mut user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        user.is_active = false;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn purge_user(&self, id: i64) -> Result<()> {
        let (_, user) = self
            .users
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        if let Some(email) = &user.email {
            self.emails.remove_if(&email.to_lowercase(), |_, owner| *owner == id);
        }
        if let Some(telegram_id) = user.telegram_id {
            self.telegram_ids.remove_if(&telegram_id, |_, owner| *owner == id);
        }
        self.assignments.retain(|(user_id, _), _| *user_id != id);
        Ok(())
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn create_role(&self, new: NewRole) -> Result<Role> {
        let id = self.next_role_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.claim_role_name(&new.name, id)?;

        let now = Utc::now();
        let role = Role {
            id,
            name: new.name,
            display_name: new.display_name,
            description: new.description,
            is_active: new.is_active,
            permissions: new.permissions,
            created_at: now,
            updated_at: now,
        };
        self.roles.insert(id, role.clone());
        Ok(role)
    }

    async fn get_role_by_id(&self, id: i64) -> Result<Option<Role>> {
        Ok(self.roles.get(&id).map(|r| r.clone()))
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let Some(id) = self.role_names.get(name).map(|id| *id) else {
            return Ok(None);
        };
        self.get_role_by_id(id).await
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let mut roles: Vec<Role> = self.roles.iter().map(|r| r.clone()).collect();
        roles.sort_by_key(|r| r.id);
        Ok(roles)
    }

    async fn update_role(&self, role: &Role) -> Result<()> {
        let previous = self
            .roles
            .get(&role.id)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::NotFound(format!("role {}", role.id)))?;

        if previous.name != role.name {
            self.claim_role_name(&role.name, role.id)?;
            self.role_names.remove(&previous.name);
        }

        let mut updated = role.clone();
        updated.created_at = previous.created_at;
        updated.updated_at = Utc::now();
        self.roles.insert(role.id, updated);
        Ok(())
    }

    async fn delete_role(&self, id: i64) -> Result<()> {
        let (_, role) = self
            .roles
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("role {id}")))?;
        self.role_names.remove(&role.name);
        self.assignments.retain(|(_, role_id), _| *role_id != id);
        Ok(())
    }

    async fn create_assignment(&self, user_id: i64, role_id: i64, assigned_by: i64) -> Result<()> {
        let assignment = UserRoleAssignment {
            user_id,
            role_id,
            assigned_by,
            assigned_at: Utc::now(),
            is_active: true,
        };
        match self.assignments.entry((user_id, role_id)) {
            Entry::Occupied(e) if e.get().is_active => Err(StoreError::Conflict(format!(
                "role {role_id} already assigned to user {user_id}"
            ))),
            Entry::Occupied(mut e) => {
                e.insert(assignment);
                Ok(())
            }
            Entry::Vacant(v) => {
                v.insert(assignment);
                Ok(())
            }
        }
    }

    async fn deactivate_assignment(&self, user_id: i64, role_id: i64) -> Result<bool> {
        Ok(match self.assignments.get_mut(&(user_id, role_id)) {
            Some(mut a) if a.is_active => {
                a.is_active = false;
                true
            }
            _ => false,
        })
    }

    async fn has_active_assignment(&self, user_id: i64, role_id: i64) -> Result<bool> {
        Ok(self
            .assignments
            .get(&(user_id, role_id))
            .is_some_and(|a| a.is_active))
    }

    async fn roles_for_user(&self, user_id: i64) -> Result<Vec<Role>> {
        let role_ids: Vec<i64> = self
            .assignments
            .iter()
            .filter(|a| a.user_id == user_id && a.is_active)
            .map(|a| a.role_id)
            .collect();
        Ok(role_ids
            .into_iter()
            .filter_map(|id| self.roles.get(&id).map(|r| r.clone()))
            .collect())
    }

    async fn users_with_role(&self, role_id: i64) -> Result<Vec<User>> {
        let user_ids: Vec<i64> = self
            .assignments
            .iter()
            .filter(|a| a.role_id == role_id && a.is_active)
            .map(|a| a.user_id)
            .collect();
        Ok(user_ids
            .into_iter()
            .filter_map(|id| self.users.get(&id).map(|u| u.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::auth::AuthMethod;

    fn direct(email: &str) -> NewUser {
        NewUser {
            telegram_id: None,
            email: Some(email.into()),
            username: None,
            first_name: "A".into(),
            last_name: "B".into(),
            password_hash: Some("hash".into()),
            auth_method: AuthMethod::Direct,
        }
    }

    fn role(name: &str) -> NewRole {
        NewRole {
            name: name.into(),
            display_name: name.into(),
            description: String::new(),
            is_active: true,
            permissions: Default::default(),
        }
    }

    #[tokio::test]
    async fn email_is_unique_case_insensitively() {
        let store = MemoryStore::new();
        store.create_user(direct("a@x.com")).await.unwrap();
        assert!(matches!(
            store.create_user(direct("A@X.com")).await,
            Err(StoreError::Conflict(_))
        ));
        let found = store.get_user_by_email("A@x.COM").await.unwrap().unwrap();
        assert_eq!(found.email.as_deref(), Some("a@x.com"));
    }

    #[tokio::test]
    async fn telegram_conflict_releases_email_claim() {
        let store = MemoryStore::new();
        let mut first = direct("one@x.com");
        first.telegram_id = Some(77);
        store.create_user(first).await.unwrap();

        let mut second = direct("two@x.com");
        second.telegram_id = Some(77);
        assert!(store.create_user(second).await.is_err());
        assert!(store.get_user_by_email("two@x.com").await.unwrap().is_none());
        store.create_user(direct("two@x.com")).await.unwrap();
    }

    #[tokio::test]
    async fn failed_update_releases_new_email_claim() {
        let store = MemoryStore::new();
        let mut a = direct("a@x.com");
        a.telegram_id = Some(1);
        store.create_user(a).await.unwrap();
        let mut b = direct("b@x.com");
        b.telegram_id = Some(2);
        let mut b = store.create_user(b).await.unwrap();

        b.email = Some("c@x.com".into());
        b.telegram_id = Some(1);
        assert!(matches!(
            store.update_user(&b).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store.get_user_by_email("c@x.com").await.unwrap().is_none());
        let kept = store.get_user_by_email("b@x.com").await.unwrap().unwrap();
        assert_eq!(kept.id, b.id);
        store.create_user(direct("c@x.com")).await.unwrap();
    }

    #[tokio::test]
    async fn purge_frees_identifiers_and_assignments() {
        let store = MemoryStore::new();
        let mut new = direct("gone@x.com");
        new.telegram_id = Some(9);
        let user = store.create_user(new).await.unwrap();
        let r = store.create_role(role("client")).await.unwrap();
        store.create_assignment(user.id, r.id, user.id).await.unwrap();

        store.purge_user(user.id).await.unwrap();
        assert!(store.get_user_by_id(user.id).await.unwrap().is_none());
        assert!(store.get_user_by_telegram_id(9).await.unwrap().is_none());
        assert!(!store.has_active_assignment(user.id, r.id).await.unwrap());
        assert!(matches!(
            store.purge_user(user.id).await,
            Err(StoreError::NotFound(_))
        ));
        store.create_user(direct("gone@x.com")).await.unwrap();
    }

    #[tokio::test]
    async fn update_and_soft_delete() {
        let store = MemoryStore::new();
        let mut user = store.create_user(direct("a@x.com")).await.unwrap();
        user.first_name = "Changed".into();
        store.update_user(&user).await.unwrap();
        store.delete_user(user.id).await.unwrap();

        let loaded = store.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(loaded.first_name, "Changed");
        assert!(!loaded.is_active);
        assert!(matches!(
            store.delete_user(999).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn active_assignment_is_unique_but_reassignable_after_removal() {
        let store = MemoryStore::new();
        let user = store.create_user(direct("a@x.com")).await.unwrap();
        let r = store.create_role(role("barber")).await.unwrap();

        store.create_assignment(user.id, r.id, 1).await.unwrap();
        assert!(matches!(
            store.create_assignment(user.id, r.id, 1).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store.deactivate_assignment(user.id, r.id).await.unwrap());
        assert!(!store.deactivate_assignment(user.id, r.id).await.unwrap());
        assert!(!store.has_active_assignment(user.id, r.id).await.unwrap());
        store.create_assignment(user.id, r.id, 1).await.unwrap();
        assert!(store.has_active_assignment(user.id, r.id).await.unwrap());
    }

    #[tokio::test]
    async fn delete_role_cascades_assignments() {
        let store = MemoryStore::new();
        let user = store.create_user(direct("a@x.com")).await.unwrap();
        let r = store.create_role(role("temp")).await.unwrap();
        store.create_assignment(user.id, r.id, user.id).await.unwrap();
        store.delete_role(r.id).await.unwrap();
        assert!(store.roles_for_user(user.id).await.unwrap().is_empty());
        assert!(store.get_role_by_name("temp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn renaming_role_moves_name_index() {
        let store = MemoryStore::new();
        let mut r = store.create_role(role("old")).await.unwrap();
        store.create_role(role("taken")).await.unwrap();

        r.name = "taken".into();
        assert!(matches!(
            store.update_role(&r).await,
            Err(StoreError::Conflict(_))
        ));

        r.name = "new".into();
        store.update_role(&r).await.unwrap();
        assert!(store.get_role_by_name("old").await.unwrap().is_none());
        assert_eq!(store.get_role_by_name("new").await.unwrap().unwrap().id, r.id);
    }
}
