use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{CoinSide, LamportAmount};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
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

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Pending => "pending",
            BetStatus::Batched => "batched",
            BetStatus::SubmittedToSolana => "submitted_to_solana",
            BetStatus::ConfirmedOnSolana => "confirmed_on_solana",
            BetStatus::Completed => "completed",
            BetStatus::FailedRetryable => "failed_retryable",
            BetStatus::FailedManualReview => "failed_manual_review",
        }
    }

    /// Terminal statuses never leave
    pub fn is_terminal(&self) -> bool {
        matches!(self, BetStatus::Completed | BetStatus::FailedManualReview)
    }

    /// Claimed but not yet settled or returned to the pool
    pub fn is_unsettled(&self) -> bool {
        matches!(
            self,
            BetStatus::Batched
                | BetStatus::SubmittedToSolana
                | BetStatus::ConfirmedOnSolana
                | BetStatus::FailedRetryable
        )
    }

    /// Allowed edges of the bet lifecycle
    pub fn can_transition_to(&self, next: BetStatus) -> bool {
        use BetStatus::*;
        matches!(
            (self, next),
            (Pending, Batched)
                | (Batched, SubmittedToSolana)
                | (SubmittedToSolana, ConfirmedOnSolana)
                | (ConfirmedOnSolana, Completed)
                | (Batched, FailedRetryable)
                | (SubmittedToSolana, FailedRetryable)
                | (Batched, FailedManualReview)
                | (SubmittedToSolana, FailedManualReview)
                | (FailedRetryable, Pending)
                | (FailedRetryable, FailedManualReview)
        )
    }

    /// Audit event type recorded when a bet enters this status
    pub fn audit_event(&self) -> &'static str {
        match self {
            BetStatus::Pending => "bet.requeued",
            BetStatus::Batched => "bet.claimed",
            BetStatus::SubmittedToSolana => "bet.submitted",
            BetStatus::ConfirmedOnSolana => "bet.confirmed",
            BetStatus::Completed => "bet.completed",
            BetStatus::FailedRetryable => "bet.failed_retryable",
            BetStatus::FailedManualReview => "bet.failed_manual_review",
        }
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BetStatus::Pending),
            "batched" => Ok(BetStatus::Batched),
            "submitted_to_solana" => Ok(BetStatus::SubmittedToSolana),
            "confirmed_on_solana" => Ok(BetStatus::ConfirmedOnSolana),
            "completed" => Ok(BetStatus::Completed),
            "failed_retryable" => Ok(BetStatus::FailedRetryable),
            "failed_manual_review" => Ok(BetStatus::FailedManualReview),
            other => Err(format!("unknown bet status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bet {
    pub bet_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
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
    /// Coin face drawn for this bet; reused if the bet is batched again
    pub drawn_outcome: Option<String>,
    /// Not claimable before this instant (backoff after a retryable failure)
    pub retry_after: Option<DateTime<Utc>>,
    pub version: i32,
}

/// Fields for a freshly accepted bet
#[derive(Debug, Clone)]
pub struct NewBet {
    pub bet_id: Uuid,
    pub user_wallet: String,
    pub vault_address: String,
    pub allowance_pda: Option<String>,
    pub casino_id: Option<String>,
    pub stake_amount: i64,
    pub stake_token: String,
    pub choice: CoinSide,
}

/// Column updates applied together with a status change.
///
/// `None` leaves the stored value untouched. `clear_assignment` drops the
/// batch and processor assignment when a bet goes back to the pending pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BetPatch {
    pub processor_id: Option<String>,
    pub external_batch_id: Option<Uuid>,
    pub clear_assignment: bool,
    pub solana_tx_id: Option<String>,
    pub retry_count: Option<i32>,
    pub retry_after: Option<DateTime<Utc>>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub payout_amount: Option<i64>,
    pub won: Option<bool>,
    pub drawn_outcome: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBetRequest {
    #[validate(length(min = 32, max = 44, message = "user_wallet must be a base58 public key"))]
    pub user_wallet: Option<String>,
    #[validate(length(min = 32, max = 44, message = "vault_address must be a base58 public key"))]
    pub vault_address: Option<String>,
    #[validate(length(min = 32, max = 44, message = "allowance_pda must be a base58 public key"))]
    pub allowance_pda: Option<String>,
    #[serde(deserialize_with = "deserialize_lamport_amount")]
    pub stake_amount: LamportAmount,
    #[validate(length(min = 1, max = 44))]
    pub stake_token: String,
    #[validate(custom = "validate_choice")]
    pub choice: String,
}

fn validate_choice(choice: &str) -> Result<(), ValidationError> {
    choice
        .parse::<CoinSide>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("choice"))
}

// Custom deserializer for LamportAmount from u64
fn deserialize_lamport_amount<'de, D>(deserializer: D) -> Result<LamportAmount, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let amount_u64 = u64::deserialize(deserializer)?;
    LamportAmount::try_from(amount_u64)
        .map_err(|e| serde::de::Error::custom(format!("Invalid stake amount: {}", e)))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Created,
    Submitted,
    Confirmed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Created => "created",
            BatchStatus::Submitted => "submitted",
            BatchStatus::Confirmed => "confirmed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Confirmed | BatchStatus::Failed)
    }

    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Created, Submitted) | (Created, Failed) | (Submitted, Confirmed) | (Submitted, Failed)
        )
    }

    pub fn audit_event(&self) -> &'static str {
        match self {
            BatchStatus::Created => "batch.created",
            BatchStatus::Submitted => "batch.submitted",
            BatchStatus::Confirmed => "batch.confirmed",
            BatchStatus::Failed => "batch.failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(BatchStatus::Created),
            "submitted" => Ok(BatchStatus::Submitted),
            "confirmed" => Ok(BatchStatus::Confirmed),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(format!("unknown batch status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub batch_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processor_id: String,
    pub status: BatchStatus,
    pub bet_count: i32,
    pub solana_tx_id: Option<String>,
    /// Blockhash the transaction was signed against; bounds when it can land
    pub blockhash: Option<String>,
    pub confirm_slot: Option<i64>,
    pub confirm_status: Option<String>,
    pub retry_count: i32,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPatch {
    pub solana_tx_id: Option<String>,
    pub blockhash: Option<String>,
    pub confirm_slot: Option<i64>,
    pub confirm_status: Option<String>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
}

/// Processor report moving a batch (and its bets) forward
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBatchRequest {
    pub processor_id: String,
    pub status: BatchStatus,
    pub solana_tx_id: Option<String>,
    #[serde(default)]
    pub blockhash: Option<String>,
    pub confirm_slot: Option<i64>,
    pub confirm_status: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub bet_results: Vec<BetResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
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

/// A batch with work left unfinished past the staleness window
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

impl AllowanceEventKind {
    pub fn audit_event(&self) -> &'static str {
        match self {
            AllowanceEventKind::Approved => "allowance.approved",
            AllowanceEventKind::Revoked => "allowance.revoked",
        }
    }
}

/// Allowance approve/revoke observed on-chain by the processor
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

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLogEntry {
    pub id: i64,
    pub event_time: DateTime<Utc>,
    pub event_type: String,
    pub aggregate_id: String,
    pub user_id: Option<String>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub actor: String,
}

/// Audit entry awaiting an id and timestamp from the store
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub event_type: String,
    pub aggregate_id: String,
    pub user_id: Option<String>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub actor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

impl TransitionError {
    pub fn bet(from: BetStatus, to: BetStatus) -> Self {
        Self {
            entity: "bet",
            from: from.as_str(),
            to: to.as_str(),
        }
    }

    pub fn batch(from: BatchStatus, to: BatchStatus) -> Self {
        Self {
            entity: "batch",
            from: from.as_str(),
            to: to.as_str(),
        }
    }
}

pub fn processor_actor(processor_id: &str) -> String {
    format!("processor:{}", processor_id)
}
