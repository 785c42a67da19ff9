//! API server configuration.

use std::fmt;
use std::time::Duration;

use garage_core::auth::jwt::resolve_jwt_secret;
use garage_core::auth::{AuthSettings, DEFAULT_DEPENDENCY_TIMEOUT};

/// Configuration for the API server.
#[derive(Clone)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:8080").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Redis URL for the refresh-token store. `None` disables revocation.
    pub redis_url: Option<String>,
    /// JWT signing secret.
    pub jwt_secret: String,
    /// Telegram bot token, the key for login-widget signatures.
    pub telegram_bot_token: String,
    /// Deadline for each store or cache call.
    pub dependency_timeout: Duration,
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                     | Default                              |
    /// |------------------------------|--------------------------------------|
    /// | `BIND_ADDR`                  | `127.0.0.1:8080`                     |
    /// | `DATABASE_URL`               | `postgres://localhost:5432/garage`   |
    /// | `REDIS_URL`                  | unset (refresh store disabled)       |
    /// | `JWT_SECRET` / `AUTH_SECRET` | generated & persisted to file        |
    /// | `TELEGRAM_BOT_TOKEN`         | empty (Telegram login rejected)      |
    /// | `DEPENDENCY_TIMEOUT_MS`      | `5000`                               |
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok(), resolve_jwt_secret)
    }

    fn from_vars(
        var: impl Fn(&str) -> Option<String>,
        jwt_secret: impl FnOnce() -> String,
    ) -> Self {
        Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".into()),
            database_url: var("DATABASE_URL")
                .unwrap_or_else(|| "postgres://localhost:5432/garage".into()),
            redis_url: var("REDIS_URL").filter(|u| !u.is_empty()),
            jwt_secret: jwt_secret(),
            telegram_bot_token: var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            dependency_timeout: var("DEPENDENCY_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DEPENDENCY_TIMEOUT),
        }
    }

    /// Secrets and limits for the auth service.
    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings::new(self.jwt_secret.clone(), self.telegram_bot_token.clone())
            .with_dependency_timeout(self.dependency_timeout)
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_url", &self.database_url)
            .field("redis_url", &self.redis_url)
            .field("jwt_secret", &"<redacted>")
            .field("telegram_bot_token", &"<redacted>")
            .field("dependency_timeout", &self.dependency_timeout)
            .finish()
    }
}
