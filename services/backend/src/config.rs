use anyhow::{bail, Context};
use shared::constants::{
    MAX_BETS_PER_TX, MAX_BET_LAMPORTS, MAX_BET_RETRIES, MIN_BET_LAMPORTS, RETRY_BACKOFF_BASE_MS,
    RETRY_BACKOFF_MAX_MS,
};
use shared::program_ids::parse_pubkey;
use solana_sdk::pubkey::Pubkey;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_port: u16,
    pub metrics_port: u16,
    pub database: DatabaseConfig,
    pub solana: SolanaConfig,
    pub betting: BettingConfig,
    pub settlement: SettlementConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Required unless the in-memory store is selected
    pub url: Option<String>,
    pub pool_size: u32,
    pub use_in_memory: bool,
}

#[derive(Debug, Clone)]
pub struct SolanaConfig {
    /// When set, vault addresses are derived from the user wallet instead of
    /// trusted from the request
    pub vault_program_id: Option<Pubkey>,
}

#[derive(Debug, Clone)]
pub struct BettingConfig {
    pub min_bet_lamports: u64,
    pub max_bet_lamports: u64,
}

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub max_retries: i32,
    pub retry_backoff_base_ms: i64,
    pub retry_backoff_max_ms: i64,
    pub stuck_after_seconds: i64,
    pub max_claim_size: i64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_BET_RETRIES,
            retry_backoff_base_ms: RETRY_BACKOFF_BASE_MS,
            retry_backoff_max_ms: RETRY_BACKOFF_MAX_MS,
            stuck_after_seconds: 120,
            max_claim_size: MAX_BETS_PER_TX as i64,
        }
    }
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            min_bet_lamports: MIN_BET_LAMPORTS,
            max_bet_lamports: MAX_BET_LAMPORTS,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let use_in_memory = env::var("USE_IN_MEMORY_STORE")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .context("USE_IN_MEMORY_STORE must be true or false")?;
        let database_url = env::var("DATABASE_URL").ok();
        if database_url.is_none() && !use_in_memory {
            bail!("DATABASE_URL must be set (or USE_IN_MEMORY_STORE=true)");
        }

        let vault_program_id = match env::var("VAULT_PROGRAM_ID") {
            Ok(value) => Some(parse_pubkey("VAULT_PROGRAM_ID", &value)?),
            Err(_) => None,
        };

        let betting = BettingConfig {
            min_bet_lamports: env::var("MIN_BET_LAMPORTS")
                .unwrap_or_else(|_| MIN_BET_LAMPORTS.to_string())
                .parse()?,
            max_bet_lamports: env::var("MAX_BET_LAMPORTS")
                .unwrap_or_else(|_| MAX_BET_LAMPORTS.to_string())
                .parse()?,
        };
        if betting.min_bet_lamports > betting.max_bet_lamports {
            bail!("MIN_BET_LAMPORTS exceeds MAX_BET_LAMPORTS");
        }

        Ok(Config {
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()?,
            metrics_port: env::var("METRICS_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()?,
            database: DatabaseConfig {
                url: database_url,
                pool_size: env::var("DATABASE_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()?,
                use_in_memory,
            },
            solana: SolanaConfig { vault_program_id },
            betting,
            settlement: SettlementConfig {
                max_retries: env::var("BET_MAX_RETRIES")
                    .unwrap_or_else(|_| MAX_BET_RETRIES.to_string())
                    .parse()?,
                retry_backoff_base_ms: env::var("BET_RETRY_BACKOFF_BASE_MS")
                    .unwrap_or_else(|_| RETRY_BACKOFF_BASE_MS.to_string())
                    .parse()?,
                retry_backoff_max_ms: env::var("BET_RETRY_BACKOFF_MAX_MS")
                    .unwrap_or_else(|_| RETRY_BACKOFF_MAX_MS.to_string())
                    .parse()?,
                stuck_after_seconds: env::var("STUCK_AFTER_SECONDS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()?,
                max_claim_size: env::var("MAX_CLAIM_SIZE")
                    .unwrap_or_else(|_| MAX_BETS_PER_TX.to_string())
                    .parse()?,
            },
        })
    }
}
