/// End-to-end batch settlement: backend claim, ledger submission, outcome report
mod common;

use common::{sender_for, vault_fixture, InProcessBackend, MockLedger, STAKE};
use processor::allowance::AllowanceManager;
use processor::domain::{BatchStatus, BetResult, BetStatus, UpdateBatchRequest};
use processor::ledger_gateway::SignatureStatus;
use processor::reconciliation::Reconciler;
use processor::worker_pool::{
    BatchProcessor, BatchReport, BatchSummary, CoinDrawer, LedgerExecutor, OnChainExecutor,
    SettlementApi, SimulatedExecutor,
};
use shared::accounts::Allowance;
use shared::CoinSide;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::InstructionError;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::TransactionError;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const ONE_SOL: u64 = 1_000_000_000;
const DAY: i64 = 86_400;

struct Always(CoinSide);

impl CoinDrawer for Always {
    fn draw(&self) -> CoinSide {
        self.0
    }
}

struct Harness {
    ledger: Arc<MockLedger>,
    backend: Arc<InProcessBackend>,
    api: Arc<dyn SettlementApi>,
    executor: Arc<dyn LedgerExecutor>,
}

impl Harness {
    fn new() -> Self {
        let (addresses, instructions) = vault_fixture();
        let ledger = MockLedger::new(addresses);
        let processor = Arc::new(Keypair::new());
        ledger.seed_casino(processor.pubkey(), false);

        let backend = InProcessBackend::new(Some(addresses));
        let api: Arc<dyn SettlementApi> = backend.clone();
        let sender = sender_for(ledger.clone());
        let allowances = Arc::new(AllowanceManager::new(
            sender.clone(),
            instructions,
            "processor-test",
            api.clone(),
        ));
        let executor: Arc<dyn LedgerExecutor> =
            Arc::new(OnChainExecutor::new(allowances, instructions, sender, processor));

        Self {
            ledger,
            backend,
            api,
            executor,
        }
    }

    fn batch_processor(&self, drawn: CoinSide) -> BatchProcessor {
        BatchProcessor::new(
            self.api.clone(),
            self.executor.clone(),
            Arc::new(Always(drawn)),
            5,
        )
    }

    /// Run one batch through a processor that always draws `drawn`
    async fn settle(&self, drawn: CoinSide) -> BatchSummary {
        let summary = self.batch_processor(drawn).process_batch("worker-a").await.unwrap();
        summary.expect("a batch was claimed")
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.api.clone(), self.executor.clone(), "processor-test-reconciler", 0)
    }

    /// Claim the pending bets and leave the batch `submitted` under `signature`
    async fn strand_submitted(&self, signature: &Signature, drawn: CoinSide) -> (Uuid, Vec<Uuid>) {
        let claim = self.api.claim_pending("processor-test-worker-0", 5).await.unwrap();
        let bet_ids: Vec<Uuid> = claim.bets.iter().map(|bet| bet.bet_id).collect();

        let mut submitted =
            UpdateBatchRequest::new("processor-test-worker-0", BatchStatus::Submitted);
        submitted.solana_tx_id = Some(signature.to_string());
        submitted.blockhash = Some(Hash::new_unique().to_string());
        submitted.bet_results = bet_ids
            .iter()
            .map(|id| BetResult {
                drawn_outcome: Some(drawn),
                ..BetResult::new(*id, BetStatus::SubmittedToSolana)
            })
            .collect();
        let report = self.api.report_batch(claim.batch_id, &submitted).await.unwrap();
        assert!(matches!(report, BatchReport::Applied(_)));

        // Stuck means strictly older than the window
        tokio::time::sleep(Duration::from_millis(5)).await;
        (claim.batch_id, bet_ids)
    }
}

#[tokio::test]
async fn test_batch_of_five_settles_with_double_payouts() {
    let h = Harness::new();
    let user = Pubkey::new_unique();
    let allowance = h.ledger.seed_allowance(&user, ONE_SOL, DAY);

    let mut winners = Vec::new();
    let mut losers = Vec::new();
    for choice in ["heads", "tails", "heads", "tails", "heads"] {
        let bet_id = h.backend.place_bet(&user, choice, STAKE, None).await;
        if choice == "heads" {
            winners.push(bet_id);
        } else {
            losers.push(bet_id);
        }
    }

    let summary = h.settle(CoinSide::Heads).await;
    assert_eq!(summary.claimed, 5);
    assert_eq!(summary.completed, 5);

    for bet_id in &winners {
        let bet = h.backend.bet(*bet_id).await;
        assert_eq!(bet.status, BetStatus::Completed);
        assert_eq!(bet.won, Some(true));
        assert_eq!(bet.payout_amount, Some(200_000_000));
        assert_eq!(bet.drawn_outcome.as_deref(), Some("heads"));
    }
    for bet_id in &losers {
        let bet = h.backend.bet(*bet_id).await;
        assert_eq!(bet.status, BetStatus::Completed);
        assert_eq!(bet.won, Some(false));
        assert_eq!(bet.payout_amount, Some(0));
    }

    // One transaction: a spend per bet plus a payout per winner
    let sent = h.ledger.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message.instructions.len(), 8);

    let spent: Allowance = h.ledger.get(&allowance).unwrap();
    assert_eq!(spent.spent, 5 * STAKE);
    assert!(spent.spent <= spent.amount);

    let trail = h.backend.audit_events(winners[0]).await;
    assert!(trail.contains(&"bet.submitted".to_string()));
    assert_eq!(trail.iter().filter(|event| *event == "bet.completed").count(), 1);
}

#[tokio::test]
async fn test_failing_instruction_blames_only_its_bet() {
    let h = Harness::new();
    let alice = Pubkey::new_unique();
    let bob = Pubkey::new_unique();
    let alices_allowance = h.ledger.seed_allowance(&alice, ONE_SOL, DAY);
    let bobs_allowance = h.ledger.seed_allowance(&bob, ONE_SOL, DAY);
    h.ledger.drain_on_chain(bobs_allowance);

    let alice_first = h.backend.place_bet(&alice, "heads", STAKE, None).await;
    let bob_bet = h.backend.place_bet(&bob, "tails", STAKE, None).await;
    let alice_second = h.backend.place_bet(&alice, "tails", STAKE, None).await;

    let summary = h.settle(CoinSide::Heads).await;
    assert_eq!(summary.manual_review, 1);
    assert_eq!(summary.retryable, 2);

    let bob_bet = h.backend.bet(bob_bet).await;
    assert_eq!(bob_bet.status, BetStatus::FailedManualReview);
    assert_eq!(bob_bet.last_error_code.as_deref(), Some("CONTRACT_INSUFFICIENT_ALLOWANCE"));

    for bet_id in [alice_first, alice_second] {
        let bet = h.backend.bet(bet_id).await;
        assert_eq!(bet.status, BetStatus::Pending);
        assert_eq!(bet.retry_count, 1);
        assert_eq!(bet.last_error_code.as_deref(), Some("CONTRACT_BATCH_REVERTED"));
    }

    // Nothing moved on-chain for the reverted batch
    let untouched: Allowance = h.ledger.get(&alices_allowance).unwrap();
    assert_eq!(untouched.spent, 0);
}

#[tokio::test]
async fn test_requeued_bets_settle_on_the_next_batch_with_their_drawn_face() {
    let h = Harness::new();
    let alice = Pubkey::new_unique();
    let bob = Pubkey::new_unique();
    let alices_allowance = h.ledger.seed_allowance(&alice, ONE_SOL, DAY);
    let bobs_allowance = h.ledger.seed_allowance(&bob, ONE_SOL, DAY);
    h.ledger.drain_on_chain(bobs_allowance);

    let alice_bet = h.backend.place_bet(&alice, "heads", STAKE, None).await;
    h.backend.place_bet(&bob, "heads", STAKE, None).await;

    h.settle(CoinSide::Heads).await;

    // The retry draws tails, but the face recorded on the first attempt stands
    let summary = h.settle(CoinSide::Tails).await;
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.completed, 1);

    let bet = h.backend.bet(alice_bet).await;
    assert_eq!(bet.status, BetStatus::Completed);
    assert_eq!(bet.won, Some(true));
    assert_eq!(bet.payout_amount, Some(200_000_000));

    let spent: Allowance = h.ledger.get(&alices_allowance).unwrap();
    assert_eq!(spent.spent, STAKE);
}

#[tokio::test]
async fn test_bet_without_allowance_is_screened_out() {
    let h = Harness::new();
    let funded = Pubkey::new_unique();
    h.ledger.seed_allowance(&funded, ONE_SOL, DAY);

    let settled = h.backend.place_bet(&funded, "heads", STAKE, None).await;
    let unfunded = h.backend.place_bet(&Pubkey::new_unique(), "heads", STAKE, None).await;

    let summary = h.settle(CoinSide::Tails).await;
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.manual_review, 1);

    assert_eq!(h.backend.bet(settled).await.status, BetStatus::Completed);
    let unfunded = h.backend.bet(unfunded).await;
    assert_eq!(unfunded.status, BetStatus::FailedManualReview);
    assert_eq!(unfunded.last_error_code.as_deref(), Some("NOT_FOUND_ALLOWANCE"));
    assert_eq!(h.ledger.sent()[0].message.instructions.len(), 1);
}

#[tokio::test]
async fn test_unlanded_transaction_requeues_bets_after_blockhash_expiry() {
    let h = Harness::new();
    let user = Pubkey::new_unique();
    h.ledger.seed_allowance(&user, ONE_SOL, DAY);
    h.ledger.drop_sends(true);

    let bet_id = h.backend.place_bet(&user, "heads", STAKE, None).await;
    let summary = h.settle(CoinSide::Heads).await;
    assert_eq!(summary.retryable, 1);

    let bet = h.backend.bet(bet_id).await;
    assert_eq!(bet.status, BetStatus::Pending);
    assert_eq!(bet.retry_count, 1);
    assert_eq!(bet.last_error_code.as_deref(), Some("NETWORK_CONFIRMATION_TIMEOUT"));
    assert_eq!(bet.drawn_outcome.as_deref(), Some("heads"));
}

#[tokio::test]
async fn test_confirmed_batch_is_never_applied_twice() {
    let h = Harness::new();
    let user = Pubkey::new_unique();
    h.ledger.seed_allowance(&user, ONE_SOL, DAY);
    let bet_id = h.backend.place_bet(&user, "heads", STAKE, None).await;

    let processor = h.batch_processor(CoinSide::Heads);
    let summary = processor.process_batch("worker-a").await.unwrap().unwrap();
    assert_eq!(summary.completed, 1);

    // A repeated confirmation for the finished batch changes nothing
    let bet = h.backend.bet(bet_id).await;
    let mut again = UpdateBatchRequest::new("worker-a", BatchStatus::Confirmed);
    again.solana_tx_id = bet.solana_tx_id.clone();
    again.bet_results = vec![BetResult {
        won: Some(true),
        payout_amount: Some(200_000_000),
        ..BetResult::new(bet_id, BetStatus::Completed)
    }];
    let report = h.api.report_batch(summary.batch_id, &again).await.unwrap();
    assert!(matches!(report, BatchReport::AlreadyFinal));

    // Nothing left to claim, nothing resent
    assert!(processor.process_batch("worker-a").await.unwrap().is_none());
    assert_eq!(h.ledger.sent().len(), 1);

    let trail = h.backend.audit_events(bet_id).await;
    assert_eq!(trail.iter().filter(|event| *event == "bet.completed").count(), 1);
}

#[tokio::test]
async fn test_two_workers_racing_for_one_bet() {
    let h = Harness::new();
    let user = Pubkey::new_unique();
    h.ledger.seed_allowance(&user, ONE_SOL, DAY);
    h.backend.place_bet(&user, "heads", STAKE, None).await;

    let first = h.batch_processor(CoinSide::Heads);
    let second = h.batch_processor(CoinSide::Heads);
    let (a, b) = tokio::join!(first.process_batch("worker-a"), second.process_batch("worker-b"));

    let claimed: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].claimed, 1);
    assert_eq!(h.ledger.sent().len(), 1);
}

#[tokio::test]
async fn test_simulated_ledger_settles_without_rpc() {
    let h = Harness::new();
    let user = Pubkey::new_unique();
    let bet_id = h.backend.place_bet(&user, "tails", STAKE, None).await;

    let processor = BatchProcessor::new(
        h.api.clone(),
        Arc::new(SimulatedExecutor),
        Arc::new(Always(CoinSide::Tails)),
        5,
    );
    let summary = processor.process_batch("worker-sim").await.unwrap().unwrap();
    assert_eq!(summary.completed, 1);

    let bet = h.backend.bet(bet_id).await;
    assert_eq!(bet.status, BetStatus::Completed);
    assert!(bet.solana_tx_id.unwrap().starts_with("SIM_"));
    assert_eq!(h.ledger.calls(), 0);
}

#[tokio::test]
async fn test_reconciler_confirms_landed_batch_from_recorded_faces() {
    let h = Harness::new();
    let user = Pubkey::new_unique();
    let bet_id = h.backend.place_bet(&user, "heads", STAKE, None).await;

    let signature = Signature::new_unique();
    let (batch_id, _) = h.strand_submitted(&signature, CoinSide::Heads).await;
    h.ledger.set_status(
        signature,
        SignatureStatus {
            slot: 42,
            err: None,
            commitment_reached: true,
            confirmation: Some("finalized".to_string()),
        },
    );

    let summary = h.reconciler().reconcile_once().await.unwrap();
    assert_eq!(summary.examined, 1);
    assert_eq!(summary.confirmed, 1);

    let bet = h.backend.bet(bet_id).await;
    assert_eq!(bet.status, BetStatus::Completed);
    assert_eq!(bet.won, Some(true));
    assert_eq!(bet.payout_amount, Some(200_000_000));
    assert_eq!(bet.external_batch_id, Some(batch_id));
}

#[tokio::test]
async fn test_reconciler_requeues_unknown_signature_after_blockhash_expiry() {
    let h = Harness::new();
    let bet_id = h.backend.place_bet(&Pubkey::new_unique(), "tails", STAKE, None).await;
    h.strand_submitted(&Signature::new_unique(), CoinSide::Heads).await;

    let summary = h.reconciler().reconcile_once().await.unwrap();
    assert_eq!(summary.failed, 1);

    let bet = h.backend.bet(bet_id).await;
    assert_eq!(bet.status, BetStatus::Pending);
    assert_eq!(bet.last_error_code.as_deref(), Some("NETWORK_CONFIRMATION_TIMEOUT"));
    assert!(h.api.stuck_batches(0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reconciler_waits_for_commitment() {
    let h = Harness::new();
    let bet_id = h.backend.place_bet(&Pubkey::new_unique(), "tails", STAKE, None).await;
    let signature = Signature::new_unique();
    h.strand_submitted(&signature, CoinSide::Tails).await;
    h.ledger.set_status(
        signature,
        SignatureStatus {
            slot: 7,
            err: None,
            commitment_reached: false,
            confirmation: Some("processed".to_string()),
        },
    );

    let summary = h.reconciler().reconcile_once().await.unwrap();
    assert_eq!(summary.pending, 1);
    assert_eq!(h.backend.bet(bet_id).await.status, BetStatus::SubmittedToSolana);
}

#[tokio::test]
async fn test_reconciler_waits_on_unknown_signature_while_blockhash_valid() {
    let h = Harness::new();
    h.ledger.blockhash_valid(true);
    let bet_id = h.backend.place_bet(&Pubkey::new_unique(), "heads", STAKE, None).await;
    let signature = Signature::new_unique();
    h.strand_submitted(&signature, CoinSide::Heads).await;

    // Not visible yet but could still land: the bet is left alone
    let summary = h.reconciler().reconcile_once().await.unwrap();
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.failed, 0);
    let bet = h.backend.bet(bet_id).await;
    assert_eq!(bet.status, BetStatus::SubmittedToSolana);
    assert_eq!(bet.retry_count, 0);

    // It turns up on a later pass and settles once
    h.ledger.set_status(
        signature,
        SignatureStatus {
            slot: 90,
            err: None,
            commitment_reached: true,
            confirmation: Some("finalized".to_string()),
        },
    );
    let summary = h.reconciler().reconcile_once().await.unwrap();
    assert_eq!(summary.confirmed, 1);

    let bet = h.backend.bet(bet_id).await;
    assert_eq!(bet.status, BetStatus::Completed);
    assert_eq!(bet.payout_amount, Some(200_000_000));
    let trail = h.backend.audit_events(bet_id).await;
    assert!(!trail.contains(&"bet.failed_retryable".to_string()));
}

#[tokio::test]
async fn test_reconciler_sends_terminal_on_chain_failure_to_manual_review() {
    let h = Harness::new();
    let bet_id = h.backend.place_bet(&Pubkey::new_unique(), "heads", STAKE, None).await;
    let signature = Signature::new_unique();
    h.strand_submitted(&signature, CoinSide::Heads).await;
    h.ledger.set_status(
        signature,
        SignatureStatus {
            slot: 12,
            err: Some(TransactionError::InstructionError(0, InstructionError::Custom(6016))),
            commitment_reached: true,
            confirmation: Some("confirmed".to_string()),
        },
    );

    let summary = h.reconciler().reconcile_once().await.unwrap();
    assert_eq!(summary.failed, 1);

    let bet = h.backend.bet(bet_id).await;
    assert_eq!(bet.status, BetStatus::FailedManualReview);
    assert_eq!(bet.last_error_code.as_deref(), Some("CONTRACT_CASINO_PAUSED"));
    assert_eq!(bet.retry_count, 0);
}

#[tokio::test]
async fn test_reconciler_finishes_bet_left_behind_by_a_confirmed_batch() {
    let h = Harness::new();
    let bet_id = h.backend.place_bet(&Pubkey::new_unique(), "heads", STAKE, None).await;
    let signature = Signature::new_unique();
    let (batch_id, _) = h.strand_submitted(&signature, CoinSide::Heads).await;

    // The confirmation closes the batch but its result for the bet is refused
    let mut confirmed = UpdateBatchRequest::new("processor-test-worker-0", BatchStatus::Confirmed);
    confirmed.solana_tx_id = Some(signature.to_string());
    confirmed.bet_results = vec![BetResult {
        won: Some(true),
        payout_amount: Some(300_000_000),
        drawn_outcome: Some(CoinSide::Heads),
        ..BetResult::new(bet_id, BetStatus::Completed)
    }];
    match h.api.report_batch(batch_id, &confirmed).await.unwrap() {
        BatchReport::Applied(response) => assert_eq!(response.error_count, 1),
        BatchReport::AlreadyFinal => panic!("first confirmation must apply"),
    }
    assert_eq!(h.backend.bet(bet_id).await.status, BetStatus::SubmittedToSolana);

    h.ledger.set_status(
        signature,
        SignatureStatus {
            slot: 5,
            err: None,
            commitment_reached: true,
            confirmation: Some("finalized".to_string()),
        },
    );
    tokio::time::sleep(Duration::from_millis(5)).await;
    let summary = h.reconciler().reconcile_once().await.unwrap();
    assert_eq!(summary.examined, 1);
    assert_eq!(summary.confirmed, 1);

    let bet = h.backend.bet(bet_id).await;
    assert_eq!(bet.status, BetStatus::Completed);
    assert_eq!(bet.payout_amount, Some(200_000_000));
    assert!(h.api.stuck_batches(0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bet_already_processed_on_chain_goes_to_manual_review() {
    let h = Harness::new();
    let user = Pubkey::new_unique();
    h.ledger.seed_allowance(&user, ONE_SOL, DAY);
    h.ledger.fail_next_send(TransactionError::InstructionError(0, InstructionError::Custom(0)));
    let bet_id = h.backend.place_bet(&user, "tails", STAKE, None).await;

    let summary = h.settle(CoinSide::Heads).await;
    assert_eq!(summary.manual_review, 1);
    assert_eq!(summary.retryable, 0);

    let bet = h.backend.bet(bet_id).await;
    assert_eq!(bet.status, BetStatus::FailedManualReview);
    assert_eq!(bet.last_error_code.as_deref(), Some("CONTRACT_DUPLICATE_BET"));
    assert_eq!(bet.retry_count, 0);
}
