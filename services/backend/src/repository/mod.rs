//! Durable storage for bets, batches and the audit log
//!
//! Every status change goes through [`SettlementStore::transition_bet`] or
//! [`SettlementStore::transition_batch`]: a compare-and-swap on the previous
//! status (and version, for bets) that writes the audit entry in the same
//! atomic unit. A lost race surfaces as [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AuditLogEntry, Batch, BatchPatch, BatchStatus, Bet, BetPatch, BetStatus, NewAuditEntry, NewBet,
};

pub mod memory;
pub mod postgres;

pub use memory::InMemorySettlementStore;
pub use postgres::PostgresSettlementStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    /// The row no longer matches the expected version or status
    #[error("{entity} {id} changed concurrently (expected {expected})")]
    Conflict {
        entity: &'static str,
        id: Uuid,
        expected: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt {entity} row: {detail}")]
    Corrupt { entity: &'static str, detail: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Conditional bet status change
#[derive(Debug, Clone)]
pub struct BetTransition {
    pub bet_id: Uuid,
    pub expected_version: i32,
    pub from: BetStatus,
    pub to: BetStatus,
    pub patch: BetPatch,
    pub audit: NewAuditEntry,
}

/// Conditional batch status change
#[derive(Debug, Clone)]
pub struct BatchTransition {
    pub batch_id: Uuid,
    pub from: BatchStatus,
    pub to: BatchStatus,
    pub patch: BatchPatch,
    pub audit: NewAuditEntry,
}

#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn create_bet(&self, bet: NewBet, audit: NewAuditEntry) -> StoreResult<Bet>;
    async fn find_bet(&self, bet_id: Uuid) -> StoreResult<Option<Bet>>;
    async fn find_bets_by_user(
        &self,
        user_wallet: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Bet>>;

    /// Claimable bets, oldest first, skipping those still in retry backoff
    async fn find_pending(&self, limit: i64, now: DateTime<Utc>) -> StoreResult<Vec<Bet>>;

    async fn create_batch(
        &self,
        batch_id: Uuid,
        processor_id: &str,
        audit: NewAuditEntry,
    ) -> StoreResult<Batch>;
    async fn set_batch_bet_count(&self, batch_id: Uuid, bet_count: i32) -> StoreResult<()>;
    async fn find_batch(&self, batch_id: Uuid) -> StoreResult<Option<Batch>>;
    async fn bets_in_batch(&self, batch_id: Uuid) -> StoreResult<Vec<Bet>>;

    async fn transition_bet(&self, transition: BetTransition) -> StoreResult<Bet>;
    async fn transition_batch(&self, transition: BatchTransition) -> StoreResult<Batch>;

    /// Batches still `submitted` with no update since `older_than`, and
    /// batches of any status owning a bet left unsettled since then
    async fn stuck_batches(&self, older_than: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Batch>>;

    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry>;
    async fn audit_trail(&self, aggregate_id: &str) -> StoreResult<Vec<AuditLogEntry>>;

    async fn ping(&self) -> bool;
}
