use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use session_auth::auth::redis_store::RedisRefreshStore;
use session_auth::auth::repository::{PgRefreshStore, PgUserStore};
use session_auth::auth::{
    InMemoryRefreshStore, InMemoryUserStore, RefreshStore, Role, SessionManager, UserStore,
};
use session_auth::config::{AppConfig, RefreshStoreKind};
use session_auth::{create_router, db, AppState};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize tracing subscriber for logging, RUST_LOG overrides the default
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "session_auth=info,tower_http=info,sqlx=warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Session Auth - Starting...");

    let config = AppConfig::from_env().expect("Invalid configuration");
    tracing::debug!("Loaded configuration: {:?}", config);

    // PostgreSQL backs the users whenever it is configured
    let pool = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(database_url, config.auth.store_timeout)
                .await
                .expect("Failed to create database pool");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, users are kept in memory only");
            None
        }
    };

    let users: Arc<dyn UserStore> = match &pool {
        Some(pool) => Arc::new(PgUserStore::new(pool.clone())),
        None => Arc::new(InMemoryUserStore::new()),
    };

    let refresh_store: Arc<dyn RefreshStore> = match config.refresh_store {
        RefreshStoreKind::Memory => Arc::new(InMemoryRefreshStore::new()),
        RefreshStoreKind::Postgres => {
            let pool = pool.clone().expect("DATABASE_URL is required for the postgres refresh store");
            Arc::new(PgRefreshStore::new(pool))
        }
        RefreshStoreKind::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .expect("REDIS_URL is required for the redis refresh store");
            Arc::new(
                RedisRefreshStore::connect(url)
                    .await
                    .expect("Failed to connect to Redis"),
            )
        }
    };
    tracing::info!("Refresh tokens stored in {:?} backend", config.refresh_store);

    let sessions = SessionManager::from_config(&config.auth, users, refresh_store)
        .expect("Failed to initialise session manager");

    if let Some(seed) = &config.admin_seed {
        sessions
            .ensure_user(&seed.username, &seed.password, Role::Admin)
            .await
            .expect("Failed to create admin account");
    }

    let state = AppState::new(sessions);

    // Periodically drop expired refresh tokens
    let purge_sessions = state.sessions.clone();
    let purge_interval = config.purge_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(purge_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = purge_sessions.purge_expired_refresh_tokens().await {
                tracing::warn!("Refresh token purge failed: {}", e);
            }
        }
    });

    // Create the application router
    let app = create_router(state, config.rate_limit).expect("Failed to build router");

    // Start the Axum server
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Session Auth is running on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
