//! Senalign API Server
//!
//! Serves the token purchase, payment verification, balance, and guarded
//! analysis endpoints over the payment core.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderName, Method};
use senalign_payments::{InMemoryTokenStore, PaymentService, PgTokenStore, TokenStore};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use senalign_api::analysis::RemoteAnalysisEngine;
use senalign_api::routes::create_router;
use senalign_api::{AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,senalign_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Senalign API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Select the store backend. Production runs against Postgres; without a
    // DATABASE_URL the server still comes up on the in-memory store so the
    // API can be exercised locally.
    let store: Arc<dyn TokenStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await?;
            let store = PgTokenStore::new(pool);
            store.ensure_schema().await?;
            tracing::info!("Database connection established");
            Arc::new(store)
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set - using the in-memory store; balances will not survive a restart"
            );
            Arc::new(InMemoryTokenStore::new())
        }
    };

    let payments = Arc::new(PaymentService::from_env(store)?);
    let engine = RemoteAnalysisEngine::from_config(config.analysis_engine_url.clone());
    let state = AppState::new(payments.clone(), engine, config.clone());

    // Background sweep of expired pending transactions.
    let sweeper = payments.clone();
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        interval.tick().await; // The first tick fires immediately
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.orchestrator.sweep_expired().await {
                tracing::error!(error = %e, "pending-transaction sweep failed");
            }
        }
    });
    tracing::info!("Transaction sweep task started");

    // Restrict CORS to the configured origin allowlist.
    let allowed_origins: Vec<axum::http::HeaderValue> = config
        .allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    tracing::info!(
        "CORS configured with {} allowed origins",
        allowed_origins.len()
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("user-key"),
        ]);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
