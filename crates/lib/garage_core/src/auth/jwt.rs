//! JWT token generation and verification.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AuthError;
use crate::models::auth::{TokenClaims, TokenKind, User};

/// Access token lifetime: 15 minutes.
pub const ACCESS_TOKEN_EXPIRY_SECS: i64 = 15 * 60;

/// Refresh token lifetime: 7 days.
pub const REFRESH_TOKEN_EXPIRY_SECS: i64 = 7 * 24 * 60 * 60;

/// Issues and validates HS256-signed tokens with one symmetric secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Generate a signed access token (15 min expiry).
    pub fn issue_access_token(&self, user: &User, roles: &[String]) -> Result<String, AuthError> {
        self.issue(user, roles, TokenKind::Access, ACCESS_TOKEN_EXPIRY_SECS)
    }

    /// Generate a signed refresh token (7 day expiry).
    pub fn issue_refresh_token(&self, user: &User, roles: &[String]) -> Result<String, AuthError> {
        self.issue(user, roles, TokenKind::Refresh, REFRESH_TOKEN_EXPIRY_SECS)
    }

    fn issue(
        &self,
        user: &User,
        roles: &[String],
        kind: TokenKind,
        lifetime_secs: i64,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = TokenClaims {
            user_id: user.id,
            telegram_id: user.telegram_id,
            roles: roles.to_vec(),
            kind,
            exp: (now + Duration::seconds(lifetime_secs)).timestamp(),
            iat: now.timestamp(),
            jti: new_jti(),
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims with the service secret.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
    }

    /// Verify algorithm, signature and expiry, then decode the claims strictly.
    ///
    /// Only HS256 is accepted; any other `alg` (including `none`) is rejected.
    pub fn parse_and_validate(&self, token: &str) -> Result<TokenClaims, AuthError> {
        decode::<TokenClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                other => {
                    debug!(error = ?other, "jwt rejected");
                    AuthError::InvalidToken(e.to_string())
                }
            })
    }
}

/// Random token id; uniqueness does not depend on clock resolution.
fn new_jti() -> String {
    Uuid::new_v4().to_string()
}

/// Length of a generated signing secret.
const GENERATED_SECRET_LEN: usize = 64;

/// Signing secret from `JWT_SECRET`, then `AUTH_SECRET`, then the secret
/// file under the user data dir (created on first use).
pub fn resolve_jwt_secret() -> String {
    ["JWT_SECRET", "AUTH_SECRET"]
        .into_iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| load_or_create_secret(&jwt_secret_path()))
}

/// Read the secret stored at `path`, or generate one and try to store it.
///
/// A secret that cannot be persisted is still returned; tokens it signs just
/// stop validating after a restart.
fn load_or_create_secret(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(stored) if !stored.trim().is_empty() => return stored.trim().to_string(),
        _ => {}
    }

    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SECRET_LEN)
        .map(char::from)
        .collect();
    let persisted = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|()| std::fs::write(path, &secret));
    match persisted {
        Ok(()) => info!(path = %path.display(), "generated new JWT secret"),
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "generated JWT secret could not be saved; it will change on restart"
        ),
    }
    secret
}

fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("garage")
        .join("jwt-secret")
}
