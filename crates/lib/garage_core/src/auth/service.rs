//! Authentication flows.
//!
//! [`AuthService`] is the only entry point the HTTP layer uses. It composes
//! credential checks, token issuance, the refresh-token store and the RBAC
//! engine. Every flow is a short request-scoped sequence with no persisted
//! intermediate state.

use std::sync::{Arc, LazyLock};

use tracing::{debug, info, warn};

use super::jwt::{ACCESS_TOKEN_EXPIRY_SECS, TokenService};
use super::password::{hash_password, verify_password};
use super::refresh_store::RefreshTokenStore;
use super::telegram::verify_telegram_auth;
use super::{AuthError, AuthSettings, bounded};
use crate::models::auth::{
    AuthMethod, DirectRegistration, NewUser, Principal, TelegramAuthData, TokenKind, TokenPair,
    User,
};
use crate::models::role::{ROLE_BARBER, ROLE_CLIENT, UserWithRoles};
use crate::rbac::RbacEngine;
use crate::store::{RoleStore, UserStore};

/// Minimum accepted password length for direct registration.
pub const MIN_PASSWORD_LEN: usize = 6;

type Result<T> = std::result::Result<T, AuthError>;

pub struct AuthService {
    users: Arc<dyn UserStore>,
    rbac: RbacEngine,
    tokens: TokenService,
    refresh: Arc<dyn RefreshTokenStore>,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        roles: Arc<dyn RoleStore>,
        refresh: Arc<dyn RefreshTokenStore>,
        settings: AuthSettings,
    ) -> Self {
        if !refresh.is_enforcing() {
            warn!(
                store = refresh.name(),
                "refresh tokens are not revocable with this store"
            );
        }
        Self {
            users,
            rbac: RbacEngine::new(roles).with_timeout(settings.dependency_timeout),
            tokens: TokenService::new(settings.jwt_secret.as_bytes()),
            refresh,
            settings,
        }
    }

    pub fn rbac(&self) -> &RbacEngine {
        &self.rbac
    }

    // -------------------------------------------------------------------------
    // Flows
    // -------------------------------------------------------------------------

    /// Log in (or sign up) with a Telegram login-widget payload.
    pub async fn authenticate_external(&self, data: &TelegramAuthData) -> Result<TokenPair> {
        // An empty key would let anyone compute valid signatures.
        if self.settings.telegram_secret.is_empty() {
            warn!("telegram login attempted but no bot token is configured");
            return Err(AuthError::AuthInvalid);
        }
        if !verify_telegram_auth(data, &self.settings.telegram_secret) {
            debug!(telegram_id = data.id, "telegram assertion rejected");
            return Err(AuthError::AuthInvalid);
        }

        let user = match bounded(self.timeout(), self.users.get_user_by_telegram_id(data.id))
            .await?
        {
            Some(mut user) => {
                user.first_name = data.first_name.clone();
                if let Some(last_name) = &data.last_name {
                    user.last_name = last_name.clone();
                }
                if data.username.is_some() {
                    user.username = data.username.clone();
                }
                user.is_active = true;
                bounded(self.timeout(), self.users.update_user(&user)).await?;
                self.ensure_default_role(user.id).await?;
                user
            }
            None => self.create_external_user(data).await?,
        };

        let pair = self.issue_pair(user).await?;
        self.store_refresh(&pair).await?;
        info!(user_id = pair.user.id, method = "external", "user authenticated");
        Ok(pair)
    }

    /// Register with email and password.
    ///
    /// `initiator` is the authenticated caller, if any. Only admins may
    /// register barbers.
    pub async fn register_direct(
        &self,
        registration: DirectRegistration,
        initiator: Option<i64>,
    ) -> Result<TokenPair> {
        let email = normalize_email(&registration.email);
        validate_registration(&email, &registration)?;

        let role = self.rbac.get_role_by_name(&registration.role).await?;
        if role.name == ROLE_BARBER {
            let is_admin = match initiator {
                Some(id) => self.rbac.is_admin(id).await?,
                None => false,
            };
            if !is_admin {
                return Err(AuthError::Forbidden(
                    "only administrators can register barbers".into(),
                ));
            }
        }

        if bounded(self.timeout(), self.users.get_user_by_email(&email))
            .await?
            .is_some()
        {
            return Err(AuthError::EmailTaken);
        }

        let password_hash = hash_password(&registration.password)?;
        let new_user = NewUser {
            telegram_id: None,
            email: Some(email),
            username: None,
            first_name: registration.first_name.trim().to_string(),
            last_name: registration.last_name.trim().to_string(),
            password_hash: Some(password_hash),
            auth_method: AuthMethod::Direct,
        };
        let user = match bounded(self.timeout(), self.users.create_user(new_user)).await {
            Ok(user) => user,
            // Lost a race against a concurrent registration.
            Err(AuthError::Conflict(_)) => return Err(AuthError::EmailTaken),
            Err(e) => return Err(e),
        };

        let assigned_by = initiator.unwrap_or(user.id);
        self.assign_signup_role(user.id, role.id, assigned_by).await?;

        let pair = self.issue_pair(user).await?;
        self.store_refresh(&pair).await?;
        info!(user_id = pair.user.id, role = %role.name, "user registered");
        Ok(pair)
    }

    /// Log in with email and password. Unknown email and wrong password fail
    /// identically.
    pub async fn login_direct(&self, email: &str, password: &str) -> Result<TokenPair> {
        let email = normalize_email(email);
        let user = bounded(self.timeout(), self.users.get_user_by_email(&email))
            .await?
            .filter(|u| u.is_active);

        // Without a stored hash, verify against a dummy one so every failure
        // path costs one bcrypt round.
        let hash = user.as_ref().and_then(|u| u.password_hash.as_deref());
        let verified = verify_password(password, hash.unwrap_or_else(|| dummy_hash())) && hash.is_some();
        let user = match user {
            Some(user) if verified => user,
            Some(user) => {
                debug!(user_id = user.id, "password mismatch");
                return Err(AuthError::InvalidCredentials);
            }
            None => return Err(AuthError::InvalidCredentials),
        };

        let pair = self.issue_pair(user).await?;
        self.store_refresh(&pair).await?;
        info!(user_id = pair.user.id, method = "direct", "user authenticated");
        Ok(pair)
    }

    /// Exchange a refresh token for a new pair, rotating the stored token.
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.tokens.parse_and_validate(refresh_token)?;
        if claims.kind != TokenKind::Refresh {
            return Err(AuthError::WrongTokenType);
        }
        if claims.is_expired() {
            return Err(AuthError::Expired);
        }

        let valid = bounded(
            self.timeout(),
            self.refresh.is_valid(claims.user_id, refresh_token),
        )
        .await?;
        if !valid {
            debug!(user_id = claims.user_id, "refresh token not current");
            return Err(AuthError::RevokedOrUnknown);
        }

        let user = self.active_user(claims.user_id).await?;
        let pair = self.issue_pair(user).await?;
        bounded(
            self.timeout(),
            self.refresh
                .rotate(claims.user_id, refresh_token, &pair.refresh_token),
        )
        .await?;
        info!(user_id = claims.user_id, "tokens refreshed");
        Ok(pair)
    }

    /// Revoke the user's refresh token.
    pub async fn logout(&self, user_id: i64) -> Result<()> {
        bounded(self.timeout(), self.refresh.revoke(user_id)).await?;
        info!(user_id, "user logged out");
        Ok(())
    }

    /// Validate an access token for request authentication.
    pub async fn authorize(&self, access_token: &str) -> Result<Principal> {
        let claims = self.tokens.parse_and_validate(access_token)?;
        if claims.kind != TokenKind::Access {
            return Err(AuthError::WrongTokenType);
        }
        if claims.is_expired() {
            return Err(AuthError::Expired);
        }
        Ok(Principal {
            user_id: claims.user_id,
            telegram_id: claims.telegram_id,
            roles: claims.roles,
        })
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub async fn get_user(&self, user_id: i64) -> Result<User> {
        bounded(self.timeout(), self.users.get_user_by_id(user_id))
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("user {user_id}")))
    }

    /// A user with their currently active roles.
    pub async fn get_user_with_roles(&self, user_id: i64) -> Result<UserWithRoles> {
        let user = self.get_user(user_id).await?;
        let roles = self.rbac.get_user_roles(user_id).await?;
        Ok(UserWithRoles { user, roles })
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn timeout(&self) -> std::time::Duration {
        self.settings.dependency_timeout
    }

    async fn active_user(&self, user_id: i64) -> Result<User> {
        match bounded(self.timeout(), self.users.get_user_by_id(user_id)).await? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(AuthError::RevokedOrUnknown),
        }
    }

    async fn create_external_user(&self, data: &TelegramAuthData) -> Result<User> {
        let client = self.rbac.get_role_by_name(ROLE_CLIENT).await?;
        let user = match bounded(
            self.timeout(),
            self.users.create_user(NewUser::external(data)),
        )
        .await
        {
            Ok(user) => user,
            // A concurrent first login created the record.
            Err(AuthError::Conflict(_)) => {
                return bounded(self.timeout(), self.users.get_user_by_telegram_id(data.id))
                    .await?
                    .ok_or_else(|| AuthError::Internal("telegram user vanished".into()));
            }
            Err(e) => return Err(e),
        };

        self.assign_signup_role(user.id, client.id, user.id).await?;
        info!(user_id = user.id, telegram_id = data.id, "created user from telegram login");
        Ok(user)
    }

    /// Assign the role of a user created moments ago. If that fails the user
    /// is removed again, so the signup can be retried from scratch.
    async fn assign_signup_role(&self, user_id: i64, role_id: i64, assigned_by: i64) -> Result<()> {
        match self.rbac.assign_role(user_id, role_id, assigned_by).await {
            Ok(()) | Err(AuthError::AlreadyAssigned) => Ok(()),
            Err(e) => {
                if let Err(undo) = bounded(self.timeout(), self.users.purge_user(user_id)).await {
                    warn!(
                        user_id,
                        error = %undo,
                        "could not remove user after failed role assignment"
                    );
                }
                Err(e)
            }
        }
    }

    /// Give a returning user without any active role the `client` role.
    async fn ensure_default_role(&self, user_id: i64) -> Result<()> {
        if !self.rbac.get_user_roles(user_id).await?.is_empty() {
            return Ok(());
        }
        let client = self.rbac.get_role_by_name(ROLE_CLIENT).await?;
        match self.rbac.assign_role(user_id, client.id, user_id).await {
            Ok(()) => {
                info!(user_id, "restored default client role");
                Ok(())
            }
            Err(AuthError::AlreadyAssigned) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Issue an access/refresh pair carrying the user's current role names.
    async fn issue_pair(&self, user: User) -> Result<TokenPair> {
        let roles = self.rbac.role_names(user.id).await?;
        let access_token = self.tokens.issue_access_token(&user, &roles)?;
        let refresh_token = self.tokens.issue_refresh_token(&user, &roles)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: ACCESS_TOKEN_EXPIRY_SECS,
            user,
        })
    }

    async fn store_refresh(&self, pair: &TokenPair) -> Result<()> {
        bounded(
            self.timeout(),
            self.refresh.store(pair.user.id, &pair.refresh_token),
        )
        .await
    }
}

/// Bcrypt hash of a random value, verified against when there is no real
/// hash to compare with. Empty if hashing failed, which fails closed.
fn dummy_hash() -> &'static str {
    static DUMMY: LazyLock<String> = LazyLock::new(|| {
        let seed = uuid::Uuid::new_v4().to_string();
        hash_password(&seed).unwrap_or_default()
    });
    &DUMMY
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_registration(email: &str, registration: &DirectRegistration) -> Result<()> {
    let valid_email = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid_email {
        return Err(AuthError::Validation("invalid email address".into()));
    }
    if registration.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if registration.first_name.trim().is_empty() {
        return Err(AuthError::Validation("first_name is required".into()));
    }
    if registration.last_name.trim().is_empty() {
        return Err(AuthError::Validation("last_name is required".into()));
    }
    if registration.role != ROLE_CLIENT && registration.role != ROLE_BARBER {
        return Err(AuthError::Validation(
            "role must be 'client' or 'barber'".into(),
        ));
    }
    Ok(())
}
