//! In-process settlement store
//!
//! Backs tests and `USE_IN_MEMORY_STORE=true` runs. A single lock guards all
//! three tables so a status change and its audit entry land together. The
//! audit log is only ever appended to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BatchTransition, BetTransition, SettlementStore, StoreError, StoreResult};
use crate::domain::{
    AuditLogEntry, Batch, BatchStatus, Bet, BetPatch, BetStatus, NewAuditEntry, NewBet,
};

#[derive(Default)]
struct Tables {
    bets: HashMap<Uuid, Bet>,
    batches: HashMap<Uuid, Batch>,
    audit_log: Vec<AuditLogEntry>,
}

impl Tables {
    fn append(&mut self, entry: NewAuditEntry, now: DateTime<Utc>) -> AuditLogEntry {
        let entry = AuditLogEntry {
            id: self.audit_log.len() as i64 + 1,
            event_time: now,
            event_type: entry.event_type,
            aggregate_id: entry.aggregate_id,
            user_id: entry.user_id,
            before_state: entry.before_state,
            after_state: entry.after_state,
            metadata: entry.metadata,
            actor: entry.actor,
        };
        self.audit_log.push(entry.clone());
        entry
    }
}

#[derive(Default)]
pub struct InMemorySettlementStore {
    tables: RwLock<Tables>,
}

impl InMemorySettlementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_patch(bet: &mut Bet, patch: BetPatch) {
    if patch.clear_assignment {
        bet.external_batch_id = None;
        bet.processor_id = None;
    }
    if let Some(processor_id) = patch.processor_id {
        bet.processor_id = Some(processor_id);
    }
    if let Some(batch_id) = patch.external_batch_id {
        bet.external_batch_id = Some(batch_id);
    }
    if let Some(tx) = patch.solana_tx_id {
        bet.solana_tx_id = Some(tx);
    }
    if let Some(retry_count) = patch.retry_count {
        bet.retry_count = retry_count;
    }
    if let Some(retry_after) = patch.retry_after {
        bet.retry_after = Some(retry_after);
    }
    if let Some(code) = patch.last_error_code {
        bet.last_error_code = Some(code);
    }
    if let Some(message) = patch.last_error_message {
        bet.last_error_message = Some(message);
    }
    if let Some(payout) = patch.payout_amount {
        bet.payout_amount = Some(payout);
    }
    if let Some(won) = patch.won {
        bet.won = Some(won);
    }
    // First draw wins
    if bet.drawn_outcome.is_none() {
        bet.drawn_outcome = patch.drawn_outcome;
    }
}

#[async_trait]
impl SettlementStore for InMemorySettlementStore {
    async fn create_bet(&self, new_bet: NewBet, audit: NewAuditEntry) -> StoreResult<Bet> {
        let now = Utc::now();
        let bet = Bet {
            bet_id: new_bet.bet_id,
            created_at: now,
            updated_at: now,
            user_wallet: new_bet.user_wallet,
            vault_address: new_bet.vault_address,
            allowance_pda: new_bet.allowance_pda,
            casino_id: new_bet.casino_id,
            game_type: "coinflip".to_string(),
            stake_amount: new_bet.stake_amount,
            stake_token: new_bet.stake_token,
            choice: new_bet.choice.to_string(),
            status: BetStatus::Pending,
            external_batch_id: None,
            solana_tx_id: None,
            retry_count: 0,
            processor_id: None,
            last_error_code: None,
            last_error_message: None,
            payout_amount: None,
            won: None,
            drawn_outcome: None,
            retry_after: None,
            version: 1,
        };

        let mut tables = self.tables.write().await;
        tables.bets.insert(bet.bet_id, bet.clone());
        tables.append(audit, now);
        Ok(bet)
    }

    async fn find_bet(&self, bet_id: Uuid) -> StoreResult<Option<Bet>> {
        Ok(self.tables.read().await.bets.get(&bet_id).cloned())
    }

    async fn find_bets_by_user(
        &self,
        user_wallet: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Bet>> {
        let tables = self.tables.read().await;
        let mut bets: Vec<Bet> = tables
            .bets
            .values()
            .filter(|bet| bet.user_wallet == user_wallet)
            .cloned()
            .collect();
        bets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bets
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn find_pending(&self, limit: i64, now: DateTime<Utc>) -> StoreResult<Vec<Bet>> {
        let tables = self.tables.read().await;
        let mut bets: Vec<Bet> = tables
            .bets
            .values()
            .filter(|bet| bet.status == BetStatus::Pending)
            .filter(|bet| bet.retry_after.map_or(true, |after| after <= now))
            .cloned()
            .collect();
        bets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.bet_id.cmp(&b.bet_id)));
        bets.truncate(limit.max(0) as usize);
        Ok(bets)
    }

    async fn create_batch(
        &self,
        batch_id: Uuid,
        processor_id: &str,
        audit: NewAuditEntry,
    ) -> StoreResult<Batch> {
        let now = Utc::now();
        let batch = Batch {
            batch_id,
            created_at: now,
            updated_at: now,
            processor_id: processor_id.to_string(),
            status: BatchStatus::Created,
            bet_count: 0,
            solana_tx_id: None,
            blockhash: None,
            confirm_slot: None,
            confirm_status: None,
            retry_count: 0,
            last_error_code: None,
            last_error_message: None,
        };

        let mut tables = self.tables.write().await;
        tables.batches.insert(batch_id, batch.clone());
        tables.append(audit, now);
        Ok(batch)
    }

    async fn set_batch_bet_count(&self, batch_id: Uuid, bet_count: i32) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let batch = tables
            .batches
            .get_mut(&batch_id)
            .ok_or(StoreError::NotFound { entity: "batch", id: batch_id })?;
        batch.bet_count = bet_count;
        Ok(())
    }

    async fn find_batch(&self, batch_id: Uuid) -> StoreResult<Option<Batch>> {
        Ok(self.tables.read().await.batches.get(&batch_id).cloned())
    }

    async fn bets_in_batch(&self, batch_id: Uuid) -> StoreResult<Vec<Bet>> {
        let tables = self.tables.read().await;
        let mut bets: Vec<Bet> = tables
            .bets
            .values()
            .filter(|bet| bet.external_batch_id == Some(batch_id))
            .cloned()
            .collect();
        bets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(bets)
    }

    async fn transition_bet(&self, transition: BetTransition) -> StoreResult<Bet> {
        let now = Utc::now();
        let mut tables = self.tables.write().await;

        let bet = tables.bets.get_mut(&transition.bet_id).ok_or(StoreError::NotFound {
            entity: "bet",
            id: transition.bet_id,
        })?;
        if bet.version != transition.expected_version || bet.status != transition.from {
            return Err(StoreError::Conflict {
                entity: "bet",
                id: transition.bet_id,
                expected: format!("version {} in {}", transition.expected_version, transition.from),
            });
        }

        apply_patch(bet, transition.patch);
        bet.status = transition.to;
        bet.version += 1;
        bet.updated_at = now;
        let updated = bet.clone();

        tables.append(transition.audit, now);
        Ok(updated)
    }

    async fn transition_batch(&self, transition: BatchTransition) -> StoreResult<Batch> {
        let now = Utc::now();
        let mut tables = self.tables.write().await;

        let batch = tables.batches.get_mut(&transition.batch_id).ok_or(StoreError::NotFound {
            entity: "batch",
            id: transition.batch_id,
        })?;
        if batch.status != transition.from {
            return Err(StoreError::Conflict {
                entity: "batch",
                id: transition.batch_id,
                expected: format!("status {}", transition.from),
            });
        }

        let patch = transition.patch;
        if patch.solana_tx_id.is_some() {
            batch.solana_tx_id = patch.solana_tx_id;
        }
        if patch.blockhash.is_some() {
            batch.blockhash = patch.blockhash;
        }
        if patch.confirm_slot.is_some() {
            batch.confirm_slot = patch.confirm_slot;
        }
        if patch.confirm_status.is_some() {
            batch.confirm_status = patch.confirm_status;
        }
        if patch.last_error_code.is_some() {
            batch.last_error_code = patch.last_error_code;
        }
        if patch.last_error_message.is_some() {
            batch.last_error_message = patch.last_error_message;
        }
        batch.status = transition.to;
        batch.updated_at = now;
        let updated = batch.clone();

        tables.append(transition.audit, now);
        Ok(updated)
    }

    async fn stuck_batches(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Batch>> {
        let tables = self.tables.read().await;
        let mut batches: Vec<Batch> = tables
            .batches
            .values()
            .filter(|batch| {
                (batch.status == BatchStatus::Submitted && batch.updated_at < older_than)
                    || tables.bets.values().any(|bet| {
                        bet.external_batch_id == Some(batch.batch_id)
                            && bet.status.is_unsettled()
                            && bet.updated_at < older_than
                    })
            })
            .cloned()
            .collect();
        batches.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        batches.truncate(limit.max(0) as usize);
        Ok(batches)
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry> {
        Ok(self.tables.write().await.append(entry, Utc::now()))
    }

    async fn audit_trail(&self, aggregate_id: &str) -> StoreResult<Vec<AuditLogEntry>> {
        Ok(self
            .tables
            .read()
            .await
            .audit_log
            .iter()
            .filter(|entry| entry.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> bool {
        true
    }
}
