/// Common test utilities and fixtures for integration tests
use axum::http::{HeaderName, HeaderValue};
use axum_test::TestServer;
use backend::{
    build_router,
    config::{BettingConfig, Config, DatabaseConfig, SettlementConfig, SolanaConfig},
    handlers::bets::SESSION_WALLET_HEADER,
    repository::InMemorySettlementStore,
    services::SettlementService,
    state::AppState,
};
use serde_json::{json, Value};
use shared::pda::VaultAddresses;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;

pub const STAKE: i64 = 100_000_000;

/// Router over a fresh in-memory store
pub struct TestContext {
    pub server: TestServer,
    pub service: Arc<SettlementService>,
    pub addresses: VaultAddresses,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_settlement(SettlementConfig {
            // Requeued bets become claimable immediately
            retry_backoff_base_ms: 0,
            retry_backoff_max_ms: 0,
            ..SettlementConfig::default()
        })
    }

    pub fn with_settlement(settlement: SettlementConfig) -> Self {
        let program_id = Pubkey::new_unique();
        let addresses = VaultAddresses::new(program_id).expect("casino address");
        let config = Config {
            api_port: 0,
            metrics_port: 0,
            database: DatabaseConfig {
                url: None,
                pool_size: 1,
                use_in_memory: true,
            },
            solana: SolanaConfig {
                vault_program_id: Some(program_id),
            },
            betting: BettingConfig::default(),
            settlement: settlement.clone(),
        };
        let service = SettlementService::new(
            Arc::new(InMemorySettlementStore::new()),
            config.betting.clone(),
            settlement,
            Some(addresses),
        );
        let state = AppState::new(config, service);
        let service = state.settlement.clone();
        let server = TestServer::new(build_router(state)).expect("Failed to start test server");

        Self {
            server,
            service,
            addresses,
        }
    }

    /// Place a bet through the API as `user`, returning the stored bet JSON
    pub async fn place_bet(&self, user: &Pubkey, choice: &str) -> Value {
        let response = self
            .server
            .post("/api/bets")
            .add_header(wallet_header(), wallet_value(user))
            .json(&json!({
                "choice": choice,
                "stake_amount": STAKE,
                "stake_token": "SOL"
            }))
            .await;
        response.assert_status_ok();
        response.json::<Value>()["bet"].clone()
    }

    /// Claim pending bets the way a processor does
    pub async fn claim(&self, processor_id: &str, limit: i64) -> Value {
        let response = self
            .server
            .get("/api/external/bets/pending")
            .add_query_param("processor_id", processor_id)
            .add_query_param("limit", limit)
            .await;
        response.assert_status_ok();
        response.json::<Value>()
    }

    pub async fn report(&self, batch_id: &str, body: Value) -> axum_test::TestResponse {
        self.server
            .post(&format!("/api/external/batches/{}", batch_id))
            .json(&body)
            .await
    }

    pub async fn bet(&self, bet_id: &str) -> Value {
        let response = self.server.get(&format!("/api/bets/{}", bet_id)).await;
        response.assert_status_ok();
        response.json::<Value>()
    }

    pub async fn audit_events(&self, bet_id: &str) -> Vec<String> {
        let response = self.server.get(&format!("/api/bets/{}/audit", bet_id)).await;
        response.assert_status_ok();
        response
            .json::<Vec<Value>>()
            .iter()
            .filter_map(|entry| entry["event_type"].as_str().map(str::to_string))
            .collect()
    }
}

pub fn wallet_header() -> HeaderName {
    HeaderName::from_static(SESSION_WALLET_HEADER)
}

pub fn wallet_value(user: &Pubkey) -> HeaderValue {
    HeaderValue::from_str(&user.to_string()).expect("base58 is a valid header value")
}

/// Helper function to parse error response
pub fn parse_error(body: &str) -> Option<(String, String, String)> {
    let json: Value = serde_json::from_str(body).ok()?;
    let error = json.get("error")?;

    Some((
        error.get("code")?.as_str()?.to_string(),
        error.get("message")?.as_str()?.to_string(),
        error.get("category")?.as_str()?.to_string(),
    ))
}
