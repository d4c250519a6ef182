/// Allowance approval, screening and revocation against the mock ledger
mod common;

use common::{sender_for, vault_fixture, InProcessBackend, MockLedger};
use processor::allowance::{AllowanceError, AllowanceManager, ApproveRequest};
use processor::domain::AllowanceEventKind;
use processor::worker_pool::SettlementApi;
use shared::accounts::Allowance;
use shared::errors::ErrorCode;
use shared::TokenType;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

const ONE_SOL: u64 = 1_000_000_000;
const DAY: i64 = 86_400;

struct Harness {
    ledger: Arc<MockLedger>,
    backend: Arc<InProcessBackend>,
    manager: AllowanceManager,
}

fn harness() -> Harness {
    let (addresses, instructions) = vault_fixture();
    let ledger = MockLedger::new(addresses);
    ledger.seed_casino(Pubkey::new_unique(), false);
    let backend = InProcessBackend::new(Some(addresses));
    let api: Arc<dyn SettlementApi> = backend.clone();
    let manager =
        AllowanceManager::new(sender_for(ledger.clone()), instructions, "processor-test", api);
    Harness {
        ledger,
        backend,
        manager,
    }
}

fn request(amount: u64, duration_seconds: i64) -> ApproveRequest {
    ApproveRequest {
        amount,
        duration_seconds,
        token: TokenType::NativeSOL,
    }
}

#[tokio::test]
async fn test_approved_allowance_gates_spend_capacity() {
    let h = harness();
    let user = Keypair::new();

    let approved = assert_ok!(h.manager.approve(&user, request(ONE_SOL, DAY)).await);
    assert_eq!(approved.nonce, 0);
    assert_eq!(h.ledger.next_nonce(&user.pubkey()), 1);
    assert_eq!(h.manager.active_allowance(&user.pubkey()).await.unwrap(), Some(approved.address));

    assert!(h.manager.can_spend(&approved.address, 500_000_000).await.unwrap());
    assert!(!h.manager.can_spend(&approved.address, 1_500_000_000).await.unwrap());

    let events = h.backend.events.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AllowanceEventKind::Approved);
    assert_eq!(events[0].nonce, Some(0));
    assert_eq!(events[0].allowance_pda, approved.address.to_string());
}

#[tokio::test]
async fn test_over_long_duration_rejected_before_submission() {
    let h = harness();
    let user = Keypair::new();

    let error = assert_err!(h.manager.approve(&user, request(ONE_SOL, DAY + 1)).await);
    assert!(matches!(error, AllowanceError::DurationTooLong { requested: 86_401, .. }));
    assert_eq!(error.failure().code, ErrorCode::VALIDATION_ALLOWANCE_DURATION_TOO_LONG);
    assert!(h.ledger.sent().is_empty());

    let error = assert_err!(h.manager.approve(&user, request(0, DAY)).await);
    assert!(matches!(error, AllowanceError::AmountOutOfRange { amount: 0, .. }));
    assert!(h.ledger.sent().is_empty());
}

#[tokio::test]
async fn test_paused_casino_rejects_approval() {
    let h = harness();
    h.ledger.seed_casino(Pubkey::new_unique(), true);

    let error = assert_err!(h.manager.approve(&Keypair::new(), request(ONE_SOL, DAY)).await);
    assert!(matches!(error, AllowanceError::CasinoPaused));
    assert!(h.ledger.sent().is_empty());
}

#[tokio::test]
async fn test_nonce_race_rereads_and_succeeds() {
    let h = harness();
    let user = Keypair::new();
    h.ledger.steal_nonces(1);

    let approved = assert_ok!(h.manager.approve(&user, request(ONE_SOL, DAY)).await);

    // The first attempt lost nonce 0; the retry used the re-read nonce
    assert_eq!(approved.nonce, 1);
    assert_eq!(h.ledger.sent().len(), 2);
    assert_eq!(h.ledger.next_nonce(&user.pubkey()), 2);
    assert_eq!(h.manager.active_allowance(&user.pubkey()).await.unwrap(), Some(approved.address));
}

#[tokio::test]
async fn test_nonce_race_is_bounded() {
    let h = harness();
    h.ledger.steal_nonces(10);

    let error = assert_err!(h.manager.approve(&Keypair::new(), request(ONE_SOL, DAY)).await);
    assert!(matches!(error, AllowanceError::NonceRace { attempts: 3 }));
    let failure = error.failure();
    assert!(failure.retryable);
    assert_eq!(failure.code, ErrorCode::CONTRACT_NONCE_RACE);
    assert_eq!(h.ledger.sent().len(), 3);
}

#[tokio::test]
async fn test_consecutive_approvals_advance_nonce_without_gaps() {
    let h = harness();
    let user = Keypair::new();

    for expected in 0..3 {
        let approved = assert_ok!(h.manager.approve(&user, request(ONE_SOL, DAY)).await);
        assert_eq!(approved.nonce, expected);
    }
    assert_eq!(h.ledger.next_nonce(&user.pubkey()), 3);
}

#[tokio::test]
async fn test_revoked_allowance_cannot_spend() {
    let h = harness();
    let user = Keypair::new();
    let address = h.ledger.seed_allowance(&user.pubkey(), ONE_SOL, DAY);

    let mut revoked: Allowance = h.ledger.get(&address).unwrap();
    revoked.revoked = true;
    h.ledger.put(address, &revoked);

    assert!(!h.manager.can_spend(&address, 1).await.unwrap());
    let mut reserved = HashMap::new();
    let error = assert_err!(
        h.manager
            .check_spend(&user.pubkey(), None, &TokenType::NativeSOL, 1, &mut reserved)
            .await
    );
    assert!(matches!(error, AllowanceError::Revoked(a) if a == address));
    assert!(!error.failure().retryable);
}

#[tokio::test]
async fn test_screening_accumulates_within_a_batch() {
    let h = harness();
    let user = Keypair::new();
    let address = h.ledger.seed_allowance(&user.pubkey(), 250_000_000, DAY);
    let mut reserved = HashMap::new();

    for _ in 0..2 {
        let screened = h
            .manager
            .check_spend(&user.pubkey(), None, &TokenType::NativeSOL, 100_000_000, &mut reserved)
            .await;
        assert_eq!(screened.unwrap(), address);
    }
    let error = assert_err!(
        h.manager
            .check_spend(&user.pubkey(), None, &TokenType::NativeSOL, 100_000_000, &mut reserved)
            .await
    );
    assert!(matches!(
        error,
        AllowanceError::Insufficient {
            remaining: 250_000_000,
            requested: 300_000_000,
            ..
        }
    ));
}

#[tokio::test]
async fn test_missing_allowance_is_not_spendable() {
    let h = harness();
    let user = Pubkey::new_unique();

    assert_eq!(h.manager.active_allowance(&user).await.unwrap(), None);
    assert!(!h.manager.can_spend(&Pubkey::new_unique(), 1).await.unwrap());
}

#[tokio::test]
async fn test_revoke_records_event() {
    let h = harness();
    let user = Keypair::new();
    let approved = assert_ok!(h.manager.approve(&user, request(ONE_SOL, DAY)).await);

    assert_ok!(h.manager.revoke(&user, &approved.address).await);

    let events = h.backend.events.lock().unwrap().clone();
    assert_eq!(events.last().map(|e| e.kind), Some(AllowanceEventKind::Revoked));
}

#[tokio::test]
async fn test_unrecorded_approval_is_reported_to_the_caller() {
    let h = harness();
    let user = Keypair::new();
    h.backend.events_down(true);

    let error = assert_err!(h.manager.approve(&user, request(ONE_SOL, DAY)).await);
    assert_eq!(error.failure().code, ErrorCode::NETWORK_BACKEND_UNAVAILABLE);

    // The approval itself landed and the error names it
    let allowance = h.manager.active_allowance(&user.pubkey()).await.unwrap().unwrap();
    let names = |error: &AllowanceError| {
        matches!(error, AllowanceError::EventNotRecorded { allowance: a, .. } if *a == allowance)
    };
    assert!(names(&error));
    assert_eq!(h.ledger.next_nonce(&user.pubkey()), 1);
    assert!(h.backend.events.lock().unwrap().is_empty());

    let error = assert_err!(h.manager.revoke(&user, &allowance).await);
    assert!(names(&error));
}
