//! Authentication domain models.
//!
//! These are internal domain models; the HTTP layer keeps its own request and
//! response DTOs in `garage_api::models`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a user first proved their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Signed third-party assertion (Telegram login widget).
    External,
    /// Email + password.
    Direct,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::External => "external",
            AuthMethod::Direct => "direct",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "external" => Some(AuthMethod::External),
            "direct" => Some(AuthMethod::Direct),
            _ => None,
        }
    }
}

/// Domain user.
///
/// `telegram_id` and `email` are each globally unique when present. The
/// password hash is only set for users created through direct registration
/// and is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub telegram_id: Option<i64>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub auth_method: AuthMethod,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insertable user; the store assigns `id` and timestamps.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub telegram_id: Option<i64>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: Option<String>,
    pub auth_method: AuthMethod,
}

impl NewUser {
    /// A user created from a verified Telegram assertion.
    pub fn external(data: &TelegramAuthData) -> Self {
        Self {
            telegram_id: Some(data.id),
            email: None,
            username: data.username.clone(),
            first_name: data.first_name.clone(),
            last_name: data.last_name.clone().unwrap_or_default(),
            password_hash: None,
            auth_method: AuthMethod::External,
        }
    }
}

/// Signed payload produced by the Telegram login widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramAuthData {
    pub id: i64,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub auth_date: i64,
    pub hash: String,
}

/// Input of the direct (email + password) registration flow.
#[derive(Debug, Clone)]
pub struct DirectRegistration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

/// Token kind carried in the `type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// JWT claims embedded in access and refresh tokens.
///
/// Decoding is strict: a missing or mistyped field rejects the whole token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject, the numeric user id.
    pub user_id: i64,
    pub telegram_id: Option<i64>,
    /// Role names at issuance time (e.g. `["client"]`).
    pub roles: Vec<String>,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Unique token id.
    pub jti: String,
}

impl TokenClaims {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.exp
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }
}

/// Issued credentials returned by every successful login flow.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub user: User,
}

/// Identity extracted from a validated access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: i64,
    pub telegram_id: Option<i64>,
    pub roles: Vec<String>,
}
