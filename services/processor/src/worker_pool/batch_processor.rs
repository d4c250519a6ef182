//! Batch processing orchestration
//!
//! Claim, resolve, persist the signature, submit, then report the outcome.
//! The backend applies every status change; this side only decides what to
//! report.

use anyhow::Result;
use shared::errors::ErrorCode;
use solana_sdk::transaction::TransactionError;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::domain::{BatchStatus, BetResult, BetStatus, UpdateBatchRequest};
use crate::retry_strategy::{classify_transaction_error, Failure};
use crate::solana_tx::SubmitOutcome;

use super::backend_client::{BatchReport, SettlementApi};
use super::executor::{LedgerExecutor, Prepared};
use super::outcome::{resolve, CoinDrawer, ResolvedBet};

/// What happened to one claimed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub claimed: usize,
    pub completed: usize,
    pub retryable: usize,
    pub manual_review: usize,
    /// Left `submitted` for reconciliation
    pub unresolved: usize,
}

impl BatchSummary {
    fn count(&mut self, results: &[BetResult]) {
        for result in results {
            match result.status {
                BetStatus::Completed => self.completed += 1,
                BetStatus::FailedRetryable => self.retryable += 1,
                BetStatus::FailedManualReview => self.manual_review += 1,
                _ => {}
            }
        }
    }
}

pub(crate) fn failed_result(bet_id: Uuid, failure: &Failure) -> BetResult {
    let status = if failure.retryable {
        BetStatus::FailedRetryable
    } else {
        BetStatus::FailedManualReview
    };
    BetResult {
        error_code: Some(failure.code.to_string()),
        error_message: Some(failure.message.clone()),
        ..BetResult::new(bet_id, status)
    }
}

pub(crate) fn completed_result(resolved: &ResolvedBet, signature: &str) -> BetResult {
    BetResult {
        solana_tx_id: Some(signature.to_string()),
        won: Some(resolved.won),
        payout_amount: Some(resolved.payout_i64()),
        drawn_outcome: Some(resolved.drawn),
        ..BetResult::new(resolved.bet.bet_id, BetStatus::Completed)
    }
}

/// Per-bet results for a reverted transaction. The bet owning the failing
/// instruction takes the classification; the others only reverted with it.
pub(crate) fn attribute_failure(
    error: &TransactionError,
    members: &[Uuid],
    owner_of: impl Fn(usize) -> Option<Uuid>,
) -> (Failure, Vec<BetResult>) {
    let (index, failure) = classify_transaction_error(error);
    let culprit = index.and_then(owner_of);

    let results = members
        .iter()
        .map(|bet_id| match culprit {
            Some(culprit) if culprit != *bet_id => failed_result(
                *bet_id,
                &Failure::retryable(
                    ErrorCode::CONTRACT_BATCH_REVERTED,
                    format!("reverted with bet {}: {}", culprit, failure.message),
                ),
            ),
            _ => failed_result(*bet_id, &failure),
        })
        .collect();
    (failure, results)
}

/// Orchestrates batch processing for a worker
pub struct BatchProcessor {
    api: Arc<dyn SettlementApi>,
    executor: Arc<dyn LedgerExecutor>,
    drawer: Arc<dyn CoinDrawer>,
    max_batch_size: usize,
}

impl BatchProcessor {
    pub fn new(
        api: Arc<dyn SettlementApi>,
        executor: Arc<dyn LedgerExecutor>,
        drawer: Arc<dyn CoinDrawer>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            api,
            executor,
            drawer,
            max_batch_size: max_batch_size.clamp(1, shared::MAX_BETS_PER_TX),
        }
    }

    /// Claim and settle one batch. `None` when nothing was pending.
    #[tracing::instrument(skip(self), fields(batch_id = tracing::field::Empty))]
    pub async fn process_batch(&self, processor_id: &str) -> Result<Option<BatchSummary>> {
        let start_time = Instant::now();

        let claim = self.api.claim_pending(processor_id, self.max_batch_size).await?;
        if claim.bets.is_empty() {
            tracing::trace!("No pending bets to process");
            return Ok(None);
        }

        let batch_id = claim.batch_id;
        tracing::Span::current().record("batch_id", tracing::field::display(batch_id));
        tracing::info!(bet_count = claim.bets.len(), "Processing batch of pending bets");
        metrics::gauge!("pending_bets_fetched").set(claim.bets.len() as f64);

        let mut summary = BatchSummary {
            batch_id,
            claimed: claim.bets.len(),
            ..Default::default()
        };

        // Bets that cannot be settled at all never reach the ledger
        let mut early_results = Vec::new();
        let mut resolved = Vec::new();
        for bet in &claim.bets {
            match resolve(bet, self.drawer.as_ref()) {
                Ok(r) => resolved.push(r),
                Err(e) => {
                    tracing::error!(bet_id = %bet.bet_id, error = %e, "Bet cannot be settled");
                    early_results.push(failed_result(bet.bet_id, &e.failure()));
                }
            }
        }

        let prepared = match self.executor.prepare(resolved.clone()).await {
            Ok(prepared) => prepared,
            Err(failure) => {
                tracing::error!(
                    code = %failure.code,
                    error = %failure.message,
                    "Batch could not be prepared"
                );
                early_results.extend(
                    resolved
                        .iter()
                        .map(|r| failed_result(r.bet.bet_id, &failure)),
                );
                let status = BatchStatus::Failed;
                self.finish(processor_id, &mut summary, status, Some(&failure), None, early_results)
                    .await?;
                return Ok(Some(summary));
            }
        };
        early_results.extend(
            prepared
                .rejected
                .iter()
                .map(|(r, failure)| failed_result(r.bet.bet_id, failure)),
        );

        if prepared.included.is_empty() {
            let failure = Failure::retryable(
                ErrorCode::CONTRACT_EXECUTION_FAILED,
                "no bet in the batch passed screening",
            );
            let status = BatchStatus::Failed;
            self.finish(processor_id, &mut summary, status, Some(&failure), None, early_results)
                .await?;
            return Ok(Some(summary));
        }

        // Persist the signature before sending so a crash leaves a traceable batch
        let mut submitted = UpdateBatchRequest::new(processor_id, BatchStatus::Submitted);
        submitted.solana_tx_id = Some(prepared.signature.clone());
        submitted.blockhash = prepared.blockhash.clone();
        submitted.bet_results = prepared
            .included
            .iter()
            .map(|r| BetResult {
                solana_tx_id: Some(prepared.signature.clone()),
                drawn_outcome: Some(r.drawn),
                ..BetResult::new(r.bet.bet_id, BetStatus::SubmittedToSolana)
            })
            .chain(early_results.iter().cloned())
            .collect();
        summary.count(&early_results);

        match self.api.report_batch(batch_id, &submitted).await {
            Ok(BatchReport::Applied(_)) => {}
            Ok(BatchReport::AlreadyFinal) => {
                tracing::warn!("Batch finalised elsewhere before submission, not sending");
                return Ok(Some(summary));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist submission, not sending");
                return Err(e);
            }
        }

        let outcome = self.executor.submit(&prepared).await;
        self.report_outcome(processor_id, &mut summary, &prepared, outcome).await?;

        let elapsed = start_time.elapsed();
        tracing::info!(
            duration_ms = elapsed.as_millis() as u64,
            completed = summary.completed,
            retryable = summary.retryable,
            manual_review = summary.manual_review,
            unresolved = summary.unresolved,
            "Batch processed"
        );
        metrics::histogram!("batch_processing_duration_seconds").record(elapsed.as_secs_f64());
        metrics::counter!("batches_processed_total").increment(1);

        Ok(Some(summary))
    }

    async fn report_outcome(
        &self,
        processor_id: &str,
        summary: &mut BatchSummary,
        prepared: &Prepared,
        outcome: SubmitOutcome,
    ) -> Result<()> {
        let members: Vec<Uuid> = prepared.included.iter().map(|r| r.bet.bet_id).collect();

        match outcome {
            SubmitOutcome::Confirmed { slot, confirmation } => {
                tracing::info!(signature = %prepared.signature, slot, "Batch confirmed");
                let mut request = UpdateBatchRequest::new(processor_id, BatchStatus::Confirmed);
                request.solana_tx_id = Some(prepared.signature.clone());
                request.confirm_slot = i64::try_from(slot).ok();
                request.confirm_status = confirmation;
                request.bet_results = prepared
                    .included
                    .iter()
                    .map(|r| completed_result(r, &prepared.signature))
                    .collect();
                self.report(summary, request).await
            }
            SubmitOutcome::Failed { error } => {
                let (failure, results) =
                    attribute_failure(&error, &members, |index| prepared.owner_of(index));
                tracing::warn!(
                    signature = %prepared.signature,
                    code = %failure.code,
                    error = %error,
                    "Batch transaction failed on-chain"
                );
                metrics::counter!("batch_chunk_failures_total").increment(1);
                let signature = Some(prepared.signature.as_str());
                self.finish_failed(processor_id, summary, &failure, signature, results)
                    .await
            }
            SubmitOutcome::Expired => {
                let failure = Failure::retryable(
                    ErrorCode::NETWORK_CONFIRMATION_TIMEOUT,
                    "blockhash expired before the transaction landed",
                );
                tracing::warn!(signature = %prepared.signature, "Batch transaction expired");
                let results = members.iter().map(|id| failed_result(*id, &failure)).collect();
                let signature = Some(prepared.signature.as_str());
                self.finish_failed(processor_id, summary, &failure, signature, results)
                    .await
            }
            SubmitOutcome::Unresolved { reason } => {
                tracing::warn!(
                    signature = %prepared.signature,
                    reason = %reason,
                    "Batch outcome unknown, leaving it for reconciliation"
                );
                metrics::counter!("batches_unresolved_total").increment(1);
                summary.unresolved = members.len();
                Ok(())
            }
        }
    }

    async fn finish_failed(
        &self,
        processor_id: &str,
        summary: &mut BatchSummary,
        failure: &Failure,
        signature: Option<&str>,
        results: Vec<BetResult>,
    ) -> Result<()> {
        self.finish(processor_id, summary, BatchStatus::Failed, Some(failure), signature, results)
            .await
    }

    async fn finish(
        &self,
        processor_id: &str,
        summary: &mut BatchSummary,
        status: BatchStatus,
        failure: Option<&Failure>,
        signature: Option<&str>,
        results: Vec<BetResult>,
    ) -> Result<()> {
        let mut request = UpdateBatchRequest::new(processor_id, status);
        request.solana_tx_id = signature.map(str::to_string);
        request.error_code = failure.map(|f| f.code.to_string());
        request.error_message = failure.map(|f| f.message.clone());
        request.bet_results = results;
        self.report(summary, request).await
    }

    async fn report(&self, summary: &mut BatchSummary, request: UpdateBatchRequest) -> Result<()> {
        match self.api.report_batch(summary.batch_id, &request).await? {
            BatchReport::Applied(response) => {
                summary.count(&request.bet_results);
                tracing::debug!(
                    status = ?response.status,
                    updated = response.updated_count,
                    skipped = response.skipped_count,
                    "Batch report applied"
                );
            }
            BatchReport::AlreadyFinal => {
                tracing::info!(
                    status = ?request.status,
                    "Batch already final, outcome recorded earlier"
                );
            }
        }
        Ok(())
    }
}
