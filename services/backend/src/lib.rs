// Library interface for backend - exposes modules for testing

pub mod config;
pub mod domain;
pub mod errors;
pub mod extractors;
pub mod handlers;
pub mod repository;
pub mod services;
pub mod state;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use shared::pda::VaultAddresses;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use config::Config;
use repository::{InMemorySettlementStore, PostgresSettlementStore, SettlementStore};
use services::SettlementService;
use state::AppState;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        .route("/health/detailed", get(handlers::health::detailed_health))
        // Bets
        .route("/api/bets", post(handlers::bets::create_bet).get(handlers::bets::list_user_bets))
        .route("/api/bets/:bet_id", get(handlers::bets::get_bet))
        .route("/api/bets/:bet_id/audit", get(handlers::bets::get_bet_audit))
        // External processor endpoints
        .route("/api/external/bets/pending", get(handlers::external::get_pending_bets))
        .route("/api/external/batches/stuck", get(handlers::external::get_stuck_batches))
        .route("/api/external/batches/:batch_id", post(handlers::external::update_batch))
        .route(
            "/api/external/allowances/events",
            post(handlers::external::record_allowance_event),
        )
        // State
        .with_state(state)
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)),
        )
}

/// Connect the configured store and assemble the application state
pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let database = (&config.database.url, config.database.use_in_memory);
    let store: Arc<dyn SettlementStore> = match database {
        (Some(url), false) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.pool_size)
                .connect(url)
                .await
                .context("Failed to connect to Postgres")?;
            let store = PostgresSettlementStore::new(pool);
            store.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Postgres store ready");
            Arc::new(store)
        }
        _ => {
            tracing::warn!("Using in-memory settlement store; state is lost on restart");
            Arc::new(InMemorySettlementStore::new())
        }
    };

    let addresses = config
        .solana
        .vault_program_id
        .map(VaultAddresses::new)
        .transpose()
        .context("Failed to derive casino address from VAULT_PROGRAM_ID")?;

    let settlement = SettlementService::new(
        store,
        config.betting.clone(),
        config.settlement.clone(),
        addresses,
    );
    Ok(AppState::new(config, settlement))
}
