//! Garage authentication API server.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use garage_api::config::ApiConfig;
use garage_core::auth::refresh_store::{
    DisabledRefreshStore, RedisRefreshStore, RefreshTokenStore,
};
use garage_core::auth::service::AuthService;
use garage_core::store::postgres::PgStore;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

/// CLI arguments for the API server. Each flag overrides the matching
/// environment variable read by [`ApiConfig::from_env`].
#[derive(Parser, Debug)]
#[command(name = "garage_api_server", about = "Garage authentication API server")]
struct Args {
    /// Address to listen on (`BIND_ADDR`).
    #[arg(long)]
    bind_addr: Option<String>,

    /// PostgreSQL connection URL (`DATABASE_URL`).
    #[arg(long)]
    database_url: Option<String>,

    /// Redis URL for refresh tokens (`REDIS_URL`). Without it tokens cannot
    /// be revoked.
    #[arg(long)]
    redis_url: Option<String>,

    /// Telegram bot token used to verify login-widget payloads
    /// (`TELEGRAM_BOT_TOKEN`).
    #[arg(long)]
    telegram_bot_token: Option<String>,

    /// Deadline for each database or Redis call, in milliseconds
    /// (`DEPENDENCY_TIMEOUT_MS`).
    #[arg(long)]
    dependency_timeout_ms: Option<u64>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 10)]
    max_connections: u32,
}

impl Args {
    fn apply(self, config: &mut ApiConfig) {
        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }
        if let Some(url) = self.database_url {
            config.database_url = url;
        }
        if let Some(url) = self.redis_url {
            config.redis_url = Some(url).filter(|u| !u.is_empty());
        }
        if let Some(token) = self.telegram_bot_token {
            config.telegram_bot_token = token;
        }
        if let Some(ms) = self.dependency_timeout_ms {
            config.dependency_timeout = Duration::from_millis(ms);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,garage_api=debug,garage_core=debug".into()),
        )
        .init();

    let args = Args::parse();

    let max_connections = args.max_connections;
    let mut config = ApiConfig::from_env();
    args.apply(&mut config);
    info!(?config, max_connections, "starting garage_api_server");
    if config.telegram_bot_token.is_empty() {
        warn!("TELEGRAM_BOT_TOKEN not set, Telegram login is disabled");
    }

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(config.dependency_timeout)
        .connect(&config.database_url)
        .await?;

    info!("running database migrations");
    garage_core::migrate::migrate(&pool).await?;

    let refresh: Arc<dyn RefreshTokenStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisRefreshStore::connect(url).await?),
        None => {
            warn!("REDIS_URL not set, refresh tokens will not be revocable");
            Arc::new(DisabledRefreshStore::new())
        }
    };

    let store = Arc::new(PgStore::new(pool));
    let auth = Arc::new(AuthService::new(
        store.clone(),
        store,
        refresh,
        config.auth_settings(),
    ));

    info!("ensuring built-in roles");
    auth.rbac().ensure_builtin_roles().await?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    let app = garage_api::router(garage_api::AppState { auth, config });

    info!(addr = %local_addr, "REST API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
