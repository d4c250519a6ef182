use anyhow::{bail, Context};
use shared::constants::MAX_BETS_PER_TX;
use shared::program_ids::parse_pubkey;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::env;
use std::time::Duration;

use crate::retry_strategy::RateLimitPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub processor: ProcessorConfig,
    pub backend: BackendConfig,
    pub solana: SolanaConfig,
    pub rpc: RpcConfig,
    pub metrics_port: u16,
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Prefix of every worker's processor id
    pub instance_id: String,
    pub worker_count: usize,
    pub batch_interval_seconds: u64,
    /// Bets claimed per batch, never above the per-transaction ceiling
    pub max_batch_size: usize,
    /// Required only when settling against the real ledger
    pub keypair_path: Option<String>,
    pub max_stuck_time_seconds: i64,
    pub reconcile_interval_seconds: u64,
    pub use_real_solana: bool,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub api_base_url: String,
}

#[derive(Debug, Clone)]
pub struct SolanaConfig {
    pub rpc_urls: Vec<String>,
    pub commitment: String,
    pub vault_program_id: Option<Pubkey>,
    pub expected_casino: Option<Pubkey>,
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub request_timeout_seconds: u64,
    pub confirm_poll_interval_ms: u64,
    pub confirm_timeout_seconds: u64,
    pub blockhash_expiry_timeout_seconds: u64,
}

impl SolanaConfig {
    pub fn commitment_config(&self) -> CommitmentConfig {
        match self.commitment.as_str() {
            "processed" => CommitmentConfig::processed(),
            "finalized" => CommitmentConfig::finalized(),
            _ => CommitmentConfig::confirmed(),
        }
    }
}

impl RpcConfig {
    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            ..RateLimitPolicy::default()
        }
    }

    /// Shortest stuck window that still lets a submission run out its blockhash
    pub fn stuck_window(&self, requested_seconds: i64) -> i64 {
        let window = self
            .confirm_timeout_seconds
            .saturating_add(self.blockhash_expiry_timeout_seconds);
        let floor = i64::try_from(window).unwrap_or(i64::MAX);
        if requested_seconds < floor {
            tracing::warn!(
                requested = requested_seconds,
                floor,
                "PROCESSOR_MAX_STUCK_TIME_SECONDS below the confirmation window, raising"
            );
        }
        requested_seconds.max(floor)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            request_timeout_seconds: 30,
            confirm_poll_interval_ms: 1_000,
            confirm_timeout_seconds: 60,
            blockhash_expiry_timeout_seconds: 90,
        }
    }
}

fn env_or<T>(key: &str, default: impl ToString) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Failed to parse {}", key))
}

fn optional_pubkey(key: &str) -> anyhow::Result<Option<Pubkey>> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(parse_pubkey(key, &value)?)),
        _ => Ok(None),
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let use_real_solana: bool = env_or("USE_REAL_SOLANA", false)?;
        let keypair_path = env::var("PROCESSOR_KEYPAIR").ok();
        let vault_program_id = optional_pubkey("VAULT_PROGRAM_ID")?;

        let rpc_primary = env::var("SOLANA_RPC_URL").ok();
        let rpc_urls = match (rpc_primary, env::var("SOLANA_RPC_FALLBACK_URL").ok()) {
            (Some(primary), Some(fallback)) if fallback != primary => vec![primary, fallback],
            (Some(primary), _) => vec![primary],
            (None, _) => Vec::new(),
        };

        if use_real_solana {
            if rpc_urls.is_empty() {
                bail!("SOLANA_RPC_URL must be set when USE_REAL_SOLANA=true");
            }
            if keypair_path.is_none() {
                bail!("PROCESSOR_KEYPAIR must be set when USE_REAL_SOLANA=true");
            }
            if vault_program_id.is_none() {
                bail!("VAULT_PROGRAM_ID must be set when USE_REAL_SOLANA=true");
            }
        }

        let requested_batch: usize = env_or("PROCESSOR_MAX_BATCH_SIZE", MAX_BETS_PER_TX)?;
        if requested_batch > MAX_BETS_PER_TX {
            tracing::warn!(
                requested = requested_batch,
                ceiling = MAX_BETS_PER_TX,
                "PROCESSOR_MAX_BATCH_SIZE above the per-transaction ceiling, clamping"
            );
        }

        let defaults = RpcConfig::default();
        let rpc = RpcConfig {
            max_attempts: env_or("RPC_MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff_base_ms: env_or("RPC_BACKOFF_BASE_MS", defaults.backoff_base_ms)?,
            backoff_max_ms: env_or("RPC_BACKOFF_MAX_MS", defaults.backoff_max_ms)?,
            request_timeout_seconds: env_or(
                "RPC_REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            )?,
            confirm_poll_interval_ms: env_or(
                "CONFIRM_POLL_INTERVAL_MS",
                defaults.confirm_poll_interval_ms,
            )?,
            confirm_timeout_seconds: env_or(
                "CONFIRM_TIMEOUT_SECONDS",
                defaults.confirm_timeout_seconds,
            )?,
            blockhash_expiry_timeout_seconds: env_or(
                "BLOCKHASH_EXPIRY_TIMEOUT_SECONDS",
                defaults.blockhash_expiry_timeout_seconds,
            )?,
        };
        let max_stuck_time_seconds =
            rpc.stuck_window(env_or("PROCESSOR_MAX_STUCK_TIME_SECONDS", 180)?);

        Ok(Config {
            processor: ProcessorConfig {
                instance_id: env::var("PROCESSOR_INSTANCE_ID")
                    .unwrap_or_else(|_| "processor".to_string()),
                worker_count: env_or("PROCESSOR_WORKER_COUNT", 4)?,
                batch_interval_seconds: env_or("PROCESSOR_BATCH_INTERVAL_SECONDS", 5)?,
                max_batch_size: requested_batch.clamp(1, MAX_BETS_PER_TX),
                keypair_path,
                max_stuck_time_seconds,
                reconcile_interval_seconds: env_or("PROCESSOR_RECONCILE_INTERVAL_SECONDS", 30)?,
                use_real_solana,
            },
            backend: BackendConfig {
                api_base_url: env::var("BACKEND_API_URL")
                    .unwrap_or_else(|_| "http://localhost:3001".to_string()),
            },
            solana: SolanaConfig {
                rpc_urls,
                commitment: env::var("SOLANA_COMMITMENT")
                    .unwrap_or_else(|_| "confirmed".to_string()),
                vault_program_id,
                expected_casino: optional_pubkey("EXPECTED_CASINO_PDA")?,
            },
            rpc,
            metrics_port: env_or("PROCESSOR_METRICS_PORT", 9091)?,
        })
    }
}
