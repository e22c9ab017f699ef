use dotenvy::dotenv;
use identity_core::{
    Cache,
    adapters::{InMemoryCache, InMemoryStore, PostgresStore},
    domain::credential::CredentialHasher,
};
use onboarding_gateway::{AppState, GatewayConfig, create_app, seed_operator};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()) // Allow RUST_LOG
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting onboarding gateway v{}...", env!("CARGO_PKG_VERSION"));
    // Load environment (.env) if present
    dotenv().ok();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };
    info!("Configuration loaded: {:?}", config);

    let hasher = match CredentialHasher::new(config.password_pepper.clone()) {
        Ok(hasher) => hasher,
        Err(e) => {
            error!("Invalid password hashing parameters: {}", e);
            return;
        }
    };

    // Session cache; sessions expire with their own TTL
    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new(100_000, config.session_ttl_seconds));
    let bind_addr = config.bind_addr;

    // --- Dependency Injection Setup ---
    let app_state = match config.database_url.clone() {
        Some(url) => {
            let pool = match PgPoolOptions::new().max_connections(5).connect(&url).await {
                Ok(pool) => pool,
                Err(e) => {
                    error!("Failed to connect to Postgres: {}", e);
                    return;
                }
            };
            info!("Connected to Postgres");
            let store = PostgresStore::new(pool, hasher);
            if let Err(e) = store.migrate().await {
                error!("Database migration failed: {}", e);
                return; // Exit if migrations fail - database is in inconsistent state
            }
            AppState::from_store(store, cache, config)
        }
        None => {
            warn!("DATABASE_URL not set, using the in-memory store (data is lost on restart)");
            AppState::from_store(InMemoryStore::new(hasher), cache, config)
        }
    };

    if let Err(e) = seed_operator(&app_state).await {
        error!("Failed to seed tenant operator: {}", e);
        return;
    }

    let app = create_app(app_state);

    info!("Onboarding gateway listening on {}", bind_addr);
    let listener = TcpListener::bind(bind_addr).await.unwrap_or_else(|e| {
        panic!("Failed to bind to address {}: {}", bind_addr, e);
    });

    axum::serve(listener, app.into_make_service())
        .await
        .unwrap_or_else(|e| {
            panic!("Server failed to run: {}", e);
        });
}
