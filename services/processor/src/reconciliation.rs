//! Reconciliation of batches left `submitted`
//!
//! A batch stays `submitted` when the processor could not learn its outcome
//! (crash, confirmation timeout, unknown signature). The ledger is asked
//! again and the answer reported like any other outcome. A signature the
//! ledger has never seen is only given up on once its blockhash has expired.

use anyhow::Result;
use shared::errors::ErrorCode;
use shared::CoinSide;
use std::str::FromStr;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::domain::{BatchStatus, Bet, BetResult, BetStatus, StuckBatch, UpdateBatchRequest};
use crate::ledger_gateway::SignatureStatus;
use crate::retry_strategy::{classify_transaction_error, Failure};
use crate::worker_pool::{
    completed_result, failed_result, resolve_with, BatchReport, LedgerExecutor, SettlementApi,
};

const STUCK_BATCH_LIMIT: usize = 50;

/// What one reconciliation pass decided
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub examined: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub pending: usize,
}

pub struct Reconciler {
    api: Arc<dyn SettlementApi>,
    executor: Arc<dyn LedgerExecutor>,
    processor_id: String,
    max_stuck_time_seconds: i64,
}

impl Reconciler {
    pub fn new(
        api: Arc<dyn SettlementApi>,
        executor: Arc<dyn LedgerExecutor>,
        processor_id: impl Into<String>,
        max_stuck_time_seconds: i64,
    ) -> Self {
        Self {
            api,
            executor,
            processor_id: processor_id.into(),
            max_stuck_time_seconds,
        }
    }

    /// Run reconciliation passes until cancelled
    pub async fn run(&self, every: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.reconcile_once().await {
                tracing::error!(error = ?e, "Reconciliation pass failed");
                metrics::counter!("reconciliation_errors_total").increment(1);
            }
        }

        tracing::info!("Reconciler stopped");
    }

    pub async fn reconcile_once(&self) -> Result<ReconcileSummary> {
        let stuck = self
            .api
            .stuck_batches(self.max_stuck_time_seconds, STUCK_BATCH_LIMIT)
            .await?;

        let mut summary = ReconcileSummary::default();
        if stuck.is_empty() {
            return Ok(summary);
        }

        tracing::info!("Found {} stuck batches to reconcile", stuck.len());

        for batch in stuck {
            summary.examined += 1;
            let batch_id = batch.batch.batch_id;
            let request = match self.decide(&batch).await {
                Some(request) => request,
                None => {
                    summary.pending += 1;
                    continue;
                }
            };

            match request.status {
                BatchStatus::Confirmed => summary.confirmed += 1,
                _ => summary.failed += 1,
            }

            match self.api.report_batch(batch_id, &request).await {
                Ok(BatchReport::Applied(_)) => {
                    tracing::info!(%batch_id, status = ?request.status, "Reconciled stuck batch");
                    metrics::counter!("reconciliation_resolved_total").increment(1);
                }
                Ok(BatchReport::AlreadyFinal) => {
                    tracing::debug!(%batch_id, "Stuck batch finalised concurrently");
                }
                Err(e) => {
                    tracing::error!(%batch_id, error = %e, "Failed to report reconciled batch");
                }
            }
        }

        Ok(summary)
    }

    /// The report to send for a stuck batch, or `None` to look again later
    async fn decide(&self, stuck: &StuckBatch) -> Option<UpdateBatchRequest> {
        let batch_id = stuck.batch.batch_id;
        let members: Vec<&Bet> = stuck
            .bets
            .iter()
            .filter(|bet| {
                matches!(
                    bet.status,
                    BetStatus::Batched | BetStatus::SubmittedToSolana | BetStatus::ConfirmedOnSolana
                )
            })
            .collect();
        if members.is_empty() {
            tracing::debug!(%batch_id, "Stuck batch has no unsettled members");
            return None;
        }

        let signature = match stuck.batch.solana_tx_id.as_deref() {
            Some(signature) => signature,
            None => {
                let failure = Failure::retryable(
                    ErrorCode::NETWORK_CONFIRMATION_TIMEOUT,
                    "batch was never given a transaction",
                );
                return Some(self.failed(&failure, None, &members));
            }
        };

        let mut status = self.read_status(stuck, signature).await?;
        if status.is_none() {
            if !self.can_never_land(stuck, signature).await? {
                return None;
            }
            // Expired: one last read catches a landing just before expiry
            status = self.read_status(stuck, signature).await?;
        }

        match status {
            None => {
                let failure = Failure::retryable(
                    ErrorCode::NETWORK_CONFIRMATION_TIMEOUT,
                    format!("transaction {} never landed before its blockhash expired", signature),
                );
                metrics::counter!("reconciliation_failed_total").increment(1);
                Some(self.failed(&failure, Some(signature), &members))
            }
            Some(SignatureStatus { err: Some(error), .. }) => {
                // The failing instruction cannot be tied to a bet here
                let (_, failure) = classify_transaction_error(&error);
                tracing::warn!(
                    %batch_id,
                    signature,
                    error = %error,
                    retryable = failure.retryable,
                    "Stuck transaction failed on-chain"
                );
                metrics::counter!("reconciliation_failed_total").increment(1);
                Some(self.failed(&failure, Some(signature), &members))
            }
            Some(status) if status.commitment_reached => {
                let mut request =
                    UpdateBatchRequest::new(&self.processor_id, BatchStatus::Confirmed);
                request.solana_tx_id = Some(signature.to_string());
                request.confirm_slot = i64::try_from(status.slot).ok();
                request.confirm_status = status.confirmation.clone();
                request.bet_results = members
                    .iter()
                    .map(|bet| settle_recorded(bet, signature))
                    .collect();
                metrics::counter!("reconciliation_confirmed_total").increment(1);
                Some(request)
            }
            Some(_) => {
                tracing::debug!(
                    %batch_id,
                    signature,
                    "Stuck transaction landed, waiting for commitment"
                );
                None
            }
        }
    }

    /// `Some(status)` when the ledger answered, `None` to look again later
    async fn read_status(
        &self,
        stuck: &StuckBatch,
        signature: &str,
    ) -> Option<Option<SignatureStatus>> {
        match self.executor.status(signature).await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(
                    batch_id = %stuck.batch.batch_id,
                    signature,
                    error = %e,
                    "Could not read stuck transaction status"
                );
                None
            }
        }
    }

    /// `Some(true)` once the batch's blockhash is past its validity window
    async fn can_never_land(&self, stuck: &StuckBatch, signature: &str) -> Option<bool> {
        let batch_id = stuck.batch.batch_id;
        let Some(blockhash) = stuck.batch.blockhash.as_deref() else {
            tracing::warn!(%batch_id, signature, "Unknown signature without a recorded blockhash");
            metrics::counter!("batches_unresolved_total").increment(1);
            return None;
        };

        match self.executor.blockhash_expired(blockhash).await {
            Ok(true) => Some(true),
            Ok(false) => {
                tracing::debug!(
                    %batch_id,
                    signature,
                    "Signature not seen yet, blockhash still valid"
                );
                Some(false)
            }
            Err(e) => {
                tracing::warn!(
                    %batch_id,
                    blockhash,
                    error = %e,
                    "Could not check blockhash validity"
                );
                None
            }
        }
    }

    fn failed(
        &self,
        failure: &Failure,
        signature: Option<&str>,
        members: &[&Bet],
    ) -> UpdateBatchRequest {
        let mut request = UpdateBatchRequest::new(&self.processor_id, BatchStatus::Failed);
        request.solana_tx_id = signature.map(str::to_string);
        request.error_code = Some(failure.code.to_string());
        request.error_message = Some(failure.message.clone());
        request.bet_results = members
            .iter()
            .map(|bet| failed_result(bet.bet_id, failure))
            .collect();
        request
    }
}

/// Completion for a bet whose transaction landed, from the face drawn before submission
fn settle_recorded(bet: &Bet, signature: &str) -> BetResult {
    let drawn = bet.drawn_outcome.as_deref().and_then(|face| CoinSide::from_str(face).ok());
    let resolved = match drawn {
        Some(drawn) => resolve_with(bet, drawn).map_err(|e| e.failure()),
        None => Err(Failure::terminal(
            ErrorCode::INTERNAL_UNEXPECTED,
            "settled on-chain without a recorded outcome",
        )),
    };

    match resolved {
        Ok(resolved) => completed_result(&resolved, signature),
        Err(failure) => {
            tracing::error!(
                bet_id = %bet.bet_id,
                error = %failure.message,
                "Landed bet needs manual review"
            );
            BetResult {
                solana_tx_id: Some(signature.to_string()),
                ..failed_result(bet.bet_id, &failure)
            }
        }
    }
}
