//! Wire types shared with the settlement backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::CoinSide;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Pending,
    Batched,
    SubmittedToSolana,
    ConfirmedOnSolana,
    Completed,
    FailedRetryable,
    FailedManualReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub bet_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub user_wallet: String,
    pub vault_address: String,
    pub allowance_pda: Option<String>,
    pub casino_id: Option<String>,
    pub game_type: String,
    pub stake_amount: i64,
    pub stake_token: String,
    pub choice: String,
    pub status: BetStatus,
    pub external_batch_id: Option<Uuid>,
    pub solana_tx_id: Option<String>,
    pub retry_count: i32,
    pub processor_id: Option<String>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub payout_amount: Option<i64>,
    pub won: Option<bool>,
    pub drawn_outcome: Option<String>,
    pub version: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Created,
    Submitted,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processor_id: String,
    pub status: BatchStatus,
    pub bet_count: i32,
    pub solana_tx_id: Option<String>,
    /// Blockhash the submitted transaction was signed against
    #[serde(default)]
    pub blockhash: Option<String>,
    pub confirm_slot: Option<i64>,
    pub confirm_status: Option<String>,
    pub retry_count: i32,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BetResult {
    pub bet_id: Uuid,
    pub status: BetStatus,
    pub solana_tx_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub won: Option<bool>,
    pub payout_amount: Option<i64>,
    pub drawn_outcome: Option<CoinSide>,
}

impl BetResult {
    pub fn new(bet_id: Uuid, status: BetStatus) -> Self {
        Self {
            bet_id,
            status,
            solana_tx_id: None,
            error_code: None,
            error_message: None,
            won: None,
            payout_amount: None,
            drawn_outcome: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBatchRequest {
    pub processor_id: String,
    pub status: BatchStatus,
    pub solana_tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<String>,
    pub confirm_slot: Option<i64>,
    pub confirm_status: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub bet_results: Vec<BetResult>,
}

impl UpdateBatchRequest {
    pub fn new(processor_id: &str, status: BatchStatus) -> Self {
        Self {
            processor_id: processor_id.to_string(),
            status,
            solana_tx_id: None,
            blockhash: None,
            confirm_slot: None,
            confirm_status: None,
            error_code: None,
            error_message: None,
            bet_results: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBatchResponse {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingBetsResponse {
    pub batch_id: Uuid,
    pub processor_id: String,
    pub bets: Vec<Bet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StuckBatch {
    pub batch: Batch,
    pub bets: Vec<Bet>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllowanceEventKind {
    Approved,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowanceEvent {
    pub kind: AllowanceEventKind,
    pub processor_id: String,
    pub user_wallet: String,
    pub allowance_pda: String,
    pub nonce: Option<u64>,
    pub amount: Option<u64>,
    pub token_mint: Option<String>,
    pub expires_at: Option<i64>,
    pub solana_tx_id: Option<String>,
}
