//! Settlement state machine
//!
//! The only place bet and batch statuses change. Each step is validated
//! against the lifecycle edges in [`crate::domain`], then applied through the
//! store as a versioned compare-and-swap that writes its audit entry in the
//! same atomic unit. Win/loss and payout are recorded only once the ledger
//! transaction is confirmed.

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use shared::errors::{ErrorCode, ServiceError};
use shared::pda::VaultAddresses;
use shared::{CoinSide, TokenType, PAYOUT_MULTIPLIER};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{BettingConfig, SettlementConfig};
use crate::domain::{
    processor_actor, AllowanceEvent, AuditLogEntry, BatchPatch, BatchStatus, Bet, BetPatch,
    BetResult, BetStatus, CreateBetRequest, NewAuditEntry, NewBet, PendingBetsResponse, StuckBatch,
    TransitionError, UpdateBatchRequest, UpdateBatchResponse,
};
use crate::errors::{AppError, Result};
use crate::repository::{BatchTransition, BetTransition, SettlementStore, StoreError};

/// Exponential backoff for a requeued bet: `base * 2^(n-1)`, capped at `max`
pub fn compute_backoff_ms(retry_count_after_increment: i32, base_ms: i64, max_ms: i64) -> i64 {
    let n = retry_count_after_increment.max(1) as u32;
    let factor = 2_i64.saturating_pow(n.saturating_sub(1));
    base_ms.saturating_mul(factor).min(max_ms)
}

enum ResultOutcome {
    Updated,
    Skipped,
}

pub struct SettlementService {
    store: Arc<dyn SettlementStore>,
    betting: BettingConfig,
    settlement: SettlementConfig,
    addresses: Option<VaultAddresses>,
}

impl SettlementService {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        betting: BettingConfig,
        settlement: SettlementConfig,
        addresses: Option<VaultAddresses>,
    ) -> Self {
        Self {
            store,
            betting,
            settlement,
            addresses,
        }
    }

    pub async fn store_healthy(&self) -> bool {
        self.store.ping().await
    }

    /// Validate and persist a new pending bet.
    ///
    /// `session_wallet` is the wallet of an authenticated caller, used when
    /// the body does not name one.
    pub async fn create_bet(
        &self,
        req: CreateBetRequest,
        session_wallet: Option<String>,
    ) -> Result<Bet> {
        let wallet = req
            .user_wallet
            .or(session_wallet)
            .ok_or_else(|| ServiceError::invalid_input("user_wallet is required"))?;
        let user = Pubkey::from_str(&wallet).map_err(|_| ServiceError::invalid_wallet(&wallet))?;

        let stake = req.stake_amount.as_u64();
        if stake < self.betting.min_bet_lamports || stake > self.betting.max_bet_lamports {
            return Err(ServiceError::invalid_amount(
                stake as i64,
                format!(
                    "stake must be between {} and {} lamports",
                    self.betting.min_bet_lamports, self.betting.max_bet_lamports
                ),
            )
            .into());
        }

        let choice = CoinSide::from_str(&req.choice)
            .map_err(|_| ServiceError::invalid_choice(&req.choice))?;
        let token = TokenType::from_str(&req.stake_token)
            .map_err(|_| ServiceError::invalid_token(&req.stake_token))?;

        let (vault_address, casino_id) = match &self.addresses {
            Some(addresses) => {
                let (derived, _) = addresses.vault(&user).map_err(|e| {
                    ServiceError::internal("vault address not derivable")
                        .with_context(e.to_string())
                })?;
                if let Some(claimed) = req.vault_address.as_deref() {
                    if claimed != derived.to_string() {
                        return Err(ServiceError::invalid_pda(derived, claimed).into());
                    }
                }
                (derived.to_string(), Some(addresses.casino().to_string()))
            }
            None => {
                let vault = req
                    .vault_address
                    .ok_or_else(|| ServiceError::invalid_input("vault_address is required"))?;
                Pubkey::from_str(&vault).map_err(|_| ServiceError::invalid_wallet(&vault))?;
                (vault, None)
            }
        };

        if let Some(allowance) = req.allowance_pda.as_deref() {
            Pubkey::from_str(allowance).map_err(|_| {
                ServiceError::invalid_input(format!(
                    "allowance_pda is not a public key: {}",
                    allowance
                ))
            })?;
        }

        let bet_id = Uuid::new_v4();
        let audit = NewAuditEntry {
            event_type: "bet.created".to_string(),
            aggregate_id: bet_id.to_string(),
            user_id: Some(wallet.clone()),
            before_state: None,
            after_state: Some(json!({
                "status": BetStatus::Pending,
                "stake_amount": stake,
                "stake_token": token.to_string(),
                "choice": choice,
            })),
            metadata: None,
            actor: format!("user:{}", wallet),
        };

        let bet = self
            .store
            .create_bet(
                NewBet {
                    bet_id,
                    user_wallet: wallet,
                    vault_address,
                    allowance_pda: req.allowance_pda,
                    casino_id,
                    stake_amount: stake as i64,
                    stake_token: token.to_string(),
                    choice,
                },
                audit,
            )
            .await?;

        metrics::counter!("bets_created_total").increment(1);
        tracing::info!(
            bet_id = %bet.bet_id,
            user_wallet = %bet.user_wallet,
            stake = stake,
            "Bet created"
        );
        Ok(bet)
    }

    pub async fn get_bet(&self, bet_id: Uuid) -> Result<Bet> {
        self.store
            .find_bet(bet_id)
            .await?
            .ok_or_else(|| ServiceError::bet_not_found(bet_id).into())
    }

    pub async fn list_user_bets(
        &self,
        user_wallet: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Bet>> {
        Ok(self
            .store
            .find_bets_by_user(user_wallet, limit.clamp(1, 100), offset.max(0))
            .await?)
    }

    pub async fn bet_audit_trail(&self, bet_id: Uuid) -> Result<Vec<AuditLogEntry>> {
        self.get_bet(bet_id).await?;
        Ok(self.store.audit_trail(&bet_id.to_string()).await?)
    }

    /// Claim up to `limit` pending bets into a new batch for `processor_id`.
    ///
    /// Bets another worker claimed first are skipped. When nothing is
    /// claimable the response carries the nil batch id and no bets.
    pub async fn claim_pending(
        &self,
        processor_id: &str,
        limit: i64,
    ) -> Result<PendingBetsResponse> {
        let limit = limit.clamp(1, self.settlement.max_claim_size.max(1));
        let candidates = self.store.find_pending(limit, Utc::now()).await?;
        let empty = PendingBetsResponse {
            batch_id: Uuid::nil(),
            processor_id: processor_id.to_string(),
            bets: Vec::new(),
        };
        if candidates.is_empty() {
            return Ok(empty);
        }

        let actor = processor_actor(processor_id);
        let batch_id = Uuid::new_v4();
        self.store
            .create_batch(
                batch_id,
                processor_id,
                NewAuditEntry {
                    event_type: BatchStatus::Created.audit_event().to_string(),
                    aggregate_id: batch_id.to_string(),
                    user_id: None,
                    before_state: None,
                    after_state: Some(json!({ "status": BatchStatus::Created })),
                    metadata: Some(json!({ "candidate_count": candidates.len() })),
                    actor: actor.clone(),
                },
            )
            .await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for bet in candidates {
            let patch = BetPatch {
                processor_id: Some(processor_id.to_string()),
                external_batch_id: Some(batch_id),
                ..Default::default()
            };
            match self
                .step(&bet, BetStatus::Batched, patch, &actor, json!({ "batch_id": batch_id }))
                .await
            {
                Ok(bet) => claimed.push(bet),
                Err(AppError::Store(StoreError::Conflict { .. })) => {
                    metrics::counter!("bet_claim_conflicts_total").increment(1);
                    tracing::debug!(
                        bet_id = %bet.bet_id,
                        "Bet claimed by another worker, skipping"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        bet_id = %bet.bet_id,
                        error = %e,
                        "Failed to claim bet, skipping"
                    );
                }
            }
        }

        if claimed.is_empty() {
            self.store
                .transition_batch(BatchTransition {
                    batch_id,
                    from: BatchStatus::Created,
                    to: BatchStatus::Failed,
                    patch: BatchPatch {
                        last_error_code: Some(ErrorCode::STATE_VERSION_CONFLICT.to_string()),
                        last_error_message: Some(
                            "every candidate bet was claimed concurrently".to_string(),
                        ),
                        ..Default::default()
                    },
                    audit: batch_audit(
                        batch_id,
                        BatchStatus::Created,
                        BatchStatus::Failed,
                        &actor,
                        json!({}),
                    ),
                })
                .await?;
            return Ok(empty);
        }

        self.store.set_batch_bet_count(batch_id, claimed.len() as i32).await?;

        metrics::counter!("bets_claimed_total").increment(claimed.len() as u64);
        tracing::info!(
            batch_id = %batch_id,
            processor_id = %processor_id,
            bet_count = claimed.len(),
            "Claimed pending bets"
        );

        Ok(PendingBetsResponse {
            batch_id,
            processor_id: processor_id.to_string(),
            bets: claimed,
        })
    }

    /// Apply a processor report: move the batch, then each listed bet.
    ///
    /// Reporting a status the batch already holds re-applies only the bet
    /// results that have not landed yet. A terminal batch accepts such a
    /// repeat only while some of its bets are still unsettled, and nothing
    /// else.
    #[tracing::instrument(
        skip(self, req),
        fields(status = %req.status, processor_id = %req.processor_id)
    )]
    pub async fn apply_batch_update(
        &self,
        batch_id: Uuid,
        req: UpdateBatchRequest,
    ) -> Result<UpdateBatchResponse> {
        let batch = self
            .store
            .find_batch(batch_id)
            .await?
            .ok_or_else(|| ServiceError::batch_not_found(batch_id))?;
        let actor = processor_actor(&req.processor_id);

        if batch.status != req.status && !batch.status.can_transition_to(req.status) {
            return Err(TransitionError::batch(batch.status, req.status).into());
        }
        if batch.status == req.status && batch.status.is_terminal() {
            let members = self.store.bets_in_batch(batch_id).await?;
            if !members.iter().any(|bet| bet.status.is_unsettled()) {
                return Err(TransitionError::batch(batch.status, req.status).into());
            }
            tracing::warn!(%batch_id, "Finishing unsettled bets of a closed batch");
        }

        if batch.status != req.status {
            let metadata = json!({
                "solana_tx_id": req.solana_tx_id,
                "confirm_slot": req.confirm_slot,
                "error_code": req.error_code,
            });
            self.store
                .transition_batch(BatchTransition {
                    batch_id,
                    from: batch.status,
                    to: req.status,
                    patch: BatchPatch {
                        solana_tx_id: req.solana_tx_id.clone(),
                        blockhash: req.blockhash.clone(),
                        confirm_slot: req.confirm_slot,
                        confirm_status: req.confirm_status.clone(),
                        last_error_code: req.error_code.clone(),
                        last_error_message: req.error_message.clone(),
                    },
                    audit: batch_audit(batch_id, batch.status, req.status, &actor, metadata),
                })
                .await?;
        }

        let mut response = UpdateBatchResponse {
            batch_id,
            status: req.status,
            updated_count: 0,
            skipped_count: 0,
            error_count: 0,
        };

        for result in &req.bet_results {
            match self.apply_bet_result(batch_id, &req, result, &actor).await {
                Ok(ResultOutcome::Updated) => response.updated_count += 1,
                Ok(ResultOutcome::Skipped) => response.skipped_count += 1,
                Err(e) => {
                    response.error_count += 1;
                    tracing::error!(
                        bet_id = %result.bet_id,
                        error = %e,
                        "Failed to apply bet result"
                    );
                }
            }
        }

        // Members the processor did not report on are retried, and requeues
        // interrupted earlier are finished
        if req.status.is_terminal() {
            for bet in self.store.bets_in_batch(batch_id).await? {
                let reported = req.bet_results.iter().any(|r| r.bet_id == bet.bet_id);
                let abandoned = req.status == BatchStatus::Failed
                    && matches!(bet.status, BetStatus::Batched | BetStatus::SubmittedToSolana);
                if reported || !(abandoned || bet.status == BetStatus::FailedRetryable) {
                    continue;
                }
                let result = BetResult {
                    bet_id: bet.bet_id,
                    status: BetStatus::FailedRetryable,
                    solana_tx_id: None,
                    error_code: req.error_code.clone(),
                    error_message: req.error_message.clone(),
                    won: None,
                    payout_amount: None,
                    drawn_outcome: None,
                };
                match self.fail_retryable(&bet, &result, &actor, batch_id).await {
                    Ok(_) => response.updated_count += 1,
                    Err(e) => {
                        response.error_count += 1;
                        tracing::error!(
                            bet_id = %bet.bet_id,
                            error = %e,
                            "Failed to requeue unreported bet"
                        );
                    }
                }
            }
        }

        metrics::counter!("batches_updated_total", "status" => req.status.as_str()).increment(1);
        tracing::info!(
            updated = response.updated_count,
            skipped = response.skipped_count,
            errors = response.error_count,
            "Batch update applied"
        );
        Ok(response)
    }

    async fn apply_bet_result(
        &self,
        batch_id: Uuid,
        req: &UpdateBatchRequest,
        result: &BetResult,
        actor: &str,
    ) -> Result<ResultOutcome> {
        let bet = self.get_bet(result.bet_id).await?;
        if bet.external_batch_id != Some(batch_id) {
            // Already requeued into the pool or settled through another batch
            if bet.status.is_terminal() || bet.status == BetStatus::Pending {
                return Ok(ResultOutcome::Skipped);
            }
            let message = format!("bet {} is not part of batch {}", bet.bet_id, batch_id);
            return Err(ServiceError::invalid_input(message).into());
        }
        if bet.status == result.status && bet.status != BetStatus::FailedRetryable {
            return Ok(ResultOutcome::Skipped);
        }

        match result.status {
            BetStatus::SubmittedToSolana => {
                let patch = BetPatch {
                    solana_tx_id: result.solana_tx_id.clone().or_else(|| req.solana_tx_id.clone()),
                    drawn_outcome: result.drawn_outcome.map(|side| side.to_string()),
                    ..Default::default()
                };
                self.step(&bet, BetStatus::SubmittedToSolana, patch, actor, meta(batch_id, req))
                    .await?;
            }
            BetStatus::Completed => {
                if req.status != BatchStatus::Confirmed {
                    let message = "completed bet results require a confirmed batch";
                    return Err(ServiceError::invalid_input(message).into());
                }
                self.complete(bet, batch_id, req, result, actor).await?;
            }
            BetStatus::FailedRetryable => {
                self.fail_retryable(&bet, result, actor, batch_id).await?;
            }
            BetStatus::FailedManualReview => {
                let patch = BetPatch {
                    solana_tx_id: result.solana_tx_id.clone(),
                    last_error_code: result.error_code.clone(),
                    last_error_message: result.error_message.clone(),
                    drawn_outcome: result.drawn_outcome.map(|side| side.to_string()),
                    ..Default::default()
                };
                self.step(&bet, BetStatus::FailedManualReview, patch, actor, meta(batch_id, req))
                    .await?;
                metrics::counter!("bets_manual_review_total").increment(1);
            }
            other => {
                let message = format!("processors cannot report bets as {}", other);
                return Err(ServiceError::invalid_input(message).into());
            }
        }
        Ok(ResultOutcome::Updated)
    }

    /// Walk a bet up to `completed`, recording the outcome on the last step
    async fn complete(
        &self,
        mut bet: Bet,
        batch_id: Uuid,
        req: &UpdateBatchRequest,
        result: &BetResult,
        actor: &str,
    ) -> Result<()> {
        let won = result
            .won
            .ok_or_else(|| ServiceError::invalid_input("completed bet results must carry won"))?;
        let payout = if won {
            bet.stake_amount
                .checked_mul(PAYOUT_MULTIPLIER as i64)
                .ok_or_else(|| ServiceError::invalid_amount(bet.stake_amount, "payout overflows"))?
        } else {
            0
        };
        if let Some(reported) = result.payout_amount {
            if reported != payout {
                let message = format!("expected payout {}", payout);
                return Err(ServiceError::invalid_amount(reported, message).into());
            }
        }

        let tx_id = result.solana_tx_id.clone().or_else(|| req.solana_tx_id.clone());
        if bet.status == BetStatus::Batched {
            let patch = BetPatch {
                solana_tx_id: tx_id.clone(),
                drawn_outcome: result.drawn_outcome.map(|side| side.to_string()),
                ..Default::default()
            };
            bet = self
                .step(&bet, BetStatus::SubmittedToSolana, patch, actor, meta(batch_id, req))
                .await?;
        }
        if bet.status == BetStatus::SubmittedToSolana {
            let patch = BetPatch {
                solana_tx_id: tx_id.clone(),
                ..Default::default()
            };
            bet = self
                .step(&bet, BetStatus::ConfirmedOnSolana, patch, actor, meta(batch_id, req))
                .await?;
        }

        let patch = BetPatch {
            won: Some(won),
            payout_amount: Some(payout),
            drawn_outcome: result.drawn_outcome.map(|side| side.to_string()),
            ..Default::default()
        };
        let mut metadata = meta(batch_id, req);
        metadata["won"] = json!(won);
        metadata["payout_amount"] = json!(payout);
        self.step(&bet, BetStatus::Completed, patch, actor, metadata).await?;

        metrics::counter!("bets_completed_total").increment(1);
        Ok(())
    }

    /// Record a retryable failure, then requeue the bet or escalate it once
    /// the retry budget is spent
    async fn fail_retryable(
        &self,
        bet: &Bet,
        result: &BetResult,
        actor: &str,
        batch_id: Uuid,
    ) -> Result<Bet> {
        let metadata = json!({ "batch_id": batch_id, "error_code": result.error_code });
        let failed = if bet.status == BetStatus::FailedRetryable {
            bet.clone()
        } else {
            let patch = BetPatch {
                solana_tx_id: result.solana_tx_id.clone(),
                last_error_code: result.error_code.clone(),
                last_error_message: result.error_message.clone(),
                drawn_outcome: result.drawn_outcome.map(|side| side.to_string()),
                ..Default::default()
            };
            self.step(bet, BetStatus::FailedRetryable, patch, actor, metadata.clone())
                .await?
        };

        let next_retry = failed.retry_count + 1;
        if next_retry > self.settlement.max_retries {
            let patch = BetPatch {
                last_error_code: Some(ErrorCode::INTERNAL_RETRIES_EXHAUSTED.to_string()),
                last_error_message: Some(format!(
                    "retry limit {} reached; last error: {}",
                    self.settlement.max_retries,
                    failed.last_error_message.as_deref().unwrap_or("unknown")
                )),
                ..Default::default()
            };
            let escalated = self
                .step(&failed, BetStatus::FailedManualReview, patch, actor, metadata)
                .await?;
            metrics::counter!("bets_manual_review_total").increment(1);
            tracing::warn!(
                bet_id = %bet.bet_id,
                retry_count = failed.retry_count,
                "Retries exhausted, bet needs manual review"
            );
            return Ok(escalated);
        }

        let backoff_ms = compute_backoff_ms(
            next_retry,
            self.settlement.retry_backoff_base_ms,
            self.settlement.retry_backoff_max_ms,
        );
        let patch = BetPatch {
            clear_assignment: true,
            retry_count: Some(next_retry),
            retry_after: Some(Utc::now() + Duration::milliseconds(backoff_ms)),
            ..Default::default()
        };
        let mut requeue_meta = metadata;
        requeue_meta["retry_count"] = json!(next_retry);
        requeue_meta["backoff_ms"] = json!(backoff_ms);
        let requeued = self
            .step(&failed, BetStatus::Pending, patch, actor, requeue_meta)
            .await?;

        metrics::counter!("bets_requeued_total").increment(1);
        tracing::info!(bet_id = %bet.bet_id, retry_count = next_retry, backoff_ms, "Bet requeued");
        Ok(requeued)
    }

    /// One validated, audited edge of the bet lifecycle
    async fn step(
        &self,
        bet: &Bet,
        to: BetStatus,
        patch: BetPatch,
        actor: &str,
        metadata: Value,
    ) -> Result<Bet> {
        if !bet.status.can_transition_to(to) {
            return Err(TransitionError::bet(bet.status, to).into());
        }

        let mut after = json!({ "status": to });
        if let Some(won) = patch.won {
            after["won"] = json!(won);
        }
        if let Some(payout) = patch.payout_amount {
            after["payout_amount"] = json!(payout);
        }
        if let Some(code) = &patch.last_error_code {
            after["last_error_code"] = json!(code);
        }

        let audit = NewAuditEntry {
            event_type: to.audit_event().to_string(),
            aggregate_id: bet.bet_id.to_string(),
            user_id: Some(bet.user_wallet.clone()),
            before_state: Some(json!({ "status": bet.status, "version": bet.version })),
            after_state: Some(after),
            metadata: Some(metadata),
            actor: actor.to_string(),
        };

        Ok(self
            .store
            .transition_bet(BetTransition {
                bet_id: bet.bet_id,
                expected_version: bet.version,
                from: bet.status,
                to,
                patch,
                audit,
            })
            .await?)
    }

    /// Batches left in `submitted`, or holding bets left unsettled, longer
    /// than the staleness window, with their member bets
    pub async fn stuck_batches(
        &self,
        older_than_seconds: Option<i64>,
        limit: i64,
    ) -> Result<Vec<StuckBatch>> {
        let window = older_than_seconds.unwrap_or(self.settlement.stuck_after_seconds).max(0);
        let cutoff = Utc::now() - Duration::seconds(window);
        let batches = self.store.stuck_batches(cutoff, limit.clamp(1, 100)).await?;

        let mut stuck = Vec::with_capacity(batches.len());
        for batch in batches {
            let bets = self.store.bets_in_batch(batch.batch_id).await?;
            stuck.push(StuckBatch { batch, bets });
        }
        metrics::gauge!("stuck_batches").set(stuck.len() as f64);
        Ok(stuck)
    }

    pub async fn record_allowance_event(&self, event: AllowanceEvent) -> Result<AuditLogEntry> {
        Pubkey::from_str(&event.user_wallet)
            .map_err(|_| ServiceError::invalid_wallet(&event.user_wallet))?;
        Pubkey::from_str(&event.allowance_pda).map_err(|_| {
            ServiceError::invalid_input(format!(
                "allowance_pda is not a public key: {}",
                event.allowance_pda
            ))
        })?;

        let entry = self
            .store
            .append_audit(NewAuditEntry {
                event_type: event.kind.audit_event().to_string(),
                aggregate_id: event.allowance_pda.clone(),
                user_id: Some(event.user_wallet.clone()),
                before_state: None,
                after_state: Some(json!({
                    "nonce": event.nonce,
                    "amount": event.amount,
                    "token_mint": event.token_mint,
                    "expires_at": event.expires_at,
                    "revoked": matches!(event.kind, crate::domain::AllowanceEventKind::Revoked),
                })),
                metadata: Some(json!({ "solana_tx_id": event.solana_tx_id })),
                actor: processor_actor(&event.processor_id),
            })
            .await?;

        tracing::info!(
            allowance = %event.allowance_pda,
            event = event.kind.audit_event(),
            "Allowance event recorded"
        );
        Ok(entry)
    }
}

fn meta(batch_id: Uuid, req: &UpdateBatchRequest) -> Value {
    json!({
        "batch_id": batch_id,
        "solana_tx_id": req.solana_tx_id,
    })
}

fn batch_audit(
    batch_id: Uuid,
    from: BatchStatus,
    to: BatchStatus,
    actor: &str,
    metadata: Value,
) -> NewAuditEntry {
    NewAuditEntry {
        event_type: to.audit_event().to_string(),
        aggregate_id: batch_id.to_string(),
        user_id: None,
        before_state: Some(json!({ "status": from })),
        after_state: Some(json!({ "status": to })),
        metadata: Some(metadata),
        actor: actor.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_backoff_progression() {
        assert_eq!(compute_backoff_ms(1, 2_000, 60_000), 2_000);
        assert_eq!(compute_backoff_ms(2, 2_000, 60_000), 4_000);
        assert_eq!(compute_backoff_ms(3, 2_000, 60_000), 8_000);
        assert_eq!(compute_backoff_ms(5, 2_000, 60_000), 32_000);
        // 64_000 capped
        assert_eq!(compute_backoff_ms(6, 2_000, 60_000), 60_000);
        assert_eq!(compute_backoff_ms(40, 2_000, 60_000), 60_000);
    }

    #[test]
    fn test_backoff_with_zero_or_negative() {
        assert_eq!(compute_backoff_ms(0, 2_000, 60_000), 2_000);
        assert_eq!(compute_backoff_ms(-1, 2_000, 60_000), 2_000);
    }
}
