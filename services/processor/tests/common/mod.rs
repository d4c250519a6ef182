/// Shared fixtures: an in-memory ledger running the vault program's
/// allowance rules, and the settlement backend driven in-process.
use anyhow::Result;
use async_trait::async_trait;
use backend::{
    config::{BettingConfig, SettlementConfig},
    domain::{CreateBetRequest, TransitionError},
    errors::AppError,
    repository::InMemorySettlementStore,
    services::SettlementService,
};
use chrono::Utc;
use processor::domain::{AllowanceEvent, PendingBetsResponse, StuckBatch, UpdateBatchRequest};
use processor::ledger_gateway::{GatewayError, LedgerGateway, LedgerRpc, SignatureStatus};
use processor::retry_strategy::RateLimitPolicy;
use processor::solana_instructions::VaultInstructions;
use processor::solana_tx::{ConfirmSettings, TransactionSender};
use processor::worker_pool::{BatchReport, SettlementApi};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use shared::accounts::{
    instruction_discriminator, AccountLayout, Allowance, AllowanceNonceRegistry, Casino,
};
use shared::pda::VaultAddresses;
use shared::program_errors::VaultProgramError;
use shared::TokenType;
use solana_sdk::{
    hash::Hash,
    instruction::InstructionError,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{Transaction, TransactionError},
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

pub const STAKE: u64 = 100_000_000;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Pubkey, Vec<u8>>,
    statuses: HashMap<Signature, SignatureStatus>,
    sent: Vec<Transaction>,
    /// Approvals that land first from elsewhere, one per upcoming approve
    nonce_thefts: usize,
    rate_limits: usize,
    forced_errors: Vec<TransactionError>,
    /// Sent transactions are accepted but never show a status
    drop_sends: bool,
    /// Blockhashes stay valid until this is cleared
    blockhash_valid: bool,
    /// Allowances spent down by transactions this ledger never saw
    drained: HashSet<Pubkey>,
    slot: u64,
    call_times: Vec<Instant>,
}

/// Ledger double that runs approvals and spends against stored accounts
pub struct MockLedger {
    addresses: VaultAddresses,
    state: Mutex<LedgerState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl MockLedger {
    pub fn new(addresses: VaultAddresses) -> Arc<Self> {
        Arc::new(Self {
            addresses,
            state: Mutex::new(LedgerState::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn put<T: AccountLayout>(&self, address: Pubkey, account: &T) {
        let data = account.encode().expect("account encodes");
        self.state.lock().unwrap().accounts.insert(address, data);
    }

    pub fn get<T: AccountLayout>(&self, address: &Pubkey) -> Option<T> {
        let state = self.state.lock().unwrap();
        state.accounts.get(address).map(|data| T::decode(data).expect("account decodes"))
    }

    pub fn seed_casino(&self, processor: Pubkey, paused: bool) {
        let bump = self.addresses.casino_bump();
        self.put(
            *self.addresses.casino(),
            &Casino {
                authority: Pubkey::new_unique(),
                processor,
                treasury: Pubkey::new_unique(),
                bump,
                vault_authority_bump: 255,
                paused,
                total_bets: 0,
                total_volume: 0,
                created_at: Utc::now().timestamp(),
            },
        );
    }

    /// Allowance at the user's next nonce, with the registry advanced past it
    pub fn seed_allowance(&self, user: &Pubkey, amount: u64, expires_in: i64) -> Pubkey {
        let nonce = self.next_nonce(user);
        let (address, bump) = self.addresses.allowance(user, nonce).expect("allowance address");
        let now = Utc::now().timestamp();
        self.put(
            address,
            &Allowance {
                user: *user,
                casino: *self.addresses.casino(),
                token_mint: TokenType::NativeSOL.ledger_mint(),
                amount,
                spent: 0,
                expires_at: now + expires_in,
                created_at: now,
                nonce,
                revoked: false,
                bump,
                last_spent_at: 0,
                spend_count: 0,
            },
        );
        self.set_next_nonce(user, nonce + 1);
        address
    }

    pub fn next_nonce(&self, user: &Pubkey) -> u64 {
        let (registry, _) = self.addresses.allowance_nonce_registry(user).expect("registry");
        self.get::<AllowanceNonceRegistry>(&registry).map_or(0, |r| r.next_nonce)
    }

    fn set_next_nonce(&self, user: &Pubkey, next_nonce: u64) {
        let (registry, bump) = self.addresses.allowance_nonce_registry(user).expect("registry");
        self.put(
            registry,
            &AllowanceNonceRegistry {
                user: *user,
                casino: *self.addresses.casino(),
                next_nonce,
                bump,
            },
        );
    }

    pub fn steal_nonces(&self, count: usize) {
        self.state.lock().unwrap().nonce_thefts = count;
    }

    pub fn rate_limit_next(&self, count: usize) {
        self.state.lock().unwrap().rate_limits = count;
    }

    pub fn fail_next_send(&self, error: TransactionError) {
        self.state.lock().unwrap().forced_errors.push(error);
    }

    pub fn drain_on_chain(&self, allowance: Pubkey) {
        self.state.lock().unwrap().drained.insert(allowance);
    }

    pub fn drop_sends(&self, drop: bool) {
        self.state.lock().unwrap().drop_sends = drop;
    }

    pub fn blockhash_valid(&self, valid: bool) {
        self.state.lock().unwrap().blockhash_valid = valid;
    }

    pub fn set_status(&self, signature: Signature, status: SignatureStatus) {
        self.state.lock().unwrap().statuses.insert(signature, status);
    }

    pub fn sent(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Gaps between consecutive calls reaching the ledger
    pub fn call_gaps(&self) -> Vec<Duration> {
        let state = self.state.lock().unwrap();
        state.call_times.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    /// Every call enters here; rate limits are charged per call
    async fn enter(&self) -> Result<InFlight<'_>, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        tokio::task::yield_now().await;

        let mut state = self.state.lock().unwrap();
        state.call_times.push(Instant::now());
        if state.rate_limits > 0 {
            state.rate_limits -= 1;
            return Err(GatewayError::RateLimited("429 Too Many Requests".to_string()));
        }
        Ok(guard)
    }

    fn execute(
        &self,
        state: &mut LedgerState,
        transaction: &Transaction,
    ) -> Result<(), TransactionError> {
        if !state.forced_errors.is_empty() {
            return Err(state.forced_errors.remove(0));
        }

        // Writes land only if every instruction succeeds
        let mut writes: HashMap<Pubkey, Vec<u8>> = HashMap::new();
        let keys = &transaction.message.account_keys;
        let approve = instruction_discriminator("approve_allowance_v2");
        let spend = instruction_discriminator("spend_from_allowance");

        for (index, ix) in transaction.message.instructions.iter().enumerate() {
            let account = |position: usize| keys[ix.accounts[position] as usize];
            let custom = |code: u32| {
                TransactionError::InstructionError(index as u8, InstructionError::Custom(code))
            };
            let fail = |error: VaultProgramError| custom(error.code());
            let read = |address: &Pubkey| {
                writes
                    .get(address)
                    .or_else(|| state.accounts.get(address))
                    .cloned()
            };

            if ix.data.starts_with(&approve) {
                let amount = u64::from_le_bytes(ix.data[8..16].try_into().unwrap());
                let duration = i64::from_le_bytes(ix.data[16..24].try_into().unwrap());
                let mint = Pubkey::try_from(&ix.data[24..56]).unwrap();
                let nonce = u64::from_le_bytes(ix.data[56..64].try_into().unwrap());
                let (registry_key, allowance_key, user) = (account(2), account(3), account(5));

                let mut registry = match read(&registry_key) {
                    Some(data) => AllowanceNonceRegistry::decode(&data).unwrap(),
                    None => AllowanceNonceRegistry {
                        user,
                        casino: *self.addresses.casino(),
                        next_nonce: 0,
                        bump: 255,
                    },
                };
                if read(&allowance_key).is_some() {
                    return Err(custom(0));
                }
                if state.nonce_thefts > 0 {
                    // Someone else's approval took this nonce first
                    state.nonce_thefts -= 1;
                    registry.next_nonce += 1;
                    state.accounts.insert(registry_key, registry.encode().unwrap());
                }
                if nonce != registry.next_nonce {
                    return Err(fail(VaultProgramError::InvalidAllowanceNonce));
                }

                let now = Utc::now().timestamp();
                let allowance = Allowance {
                    user,
                    casino: *self.addresses.casino(),
                    token_mint: mint,
                    amount,
                    spent: 0,
                    expires_at: now + duration,
                    created_at: now,
                    nonce,
                    revoked: false,
                    bump: 255,
                    last_spent_at: 0,
                    spend_count: 0,
                };
                registry.next_nonce += 1;
                writes.insert(allowance_key, allowance.encode().unwrap());
                writes.insert(registry_key, registry.encode().unwrap());
            } else if ix.data.starts_with(&spend) {
                let amount = u64::from_le_bytes(ix.data[8..16].try_into().unwrap());
                let allowance_key = account(2);
                let mut allowance = match read(&allowance_key) {
                    Some(data) => Allowance::decode(&data).unwrap(),
                    None => return Err(fail(VaultProgramError::InvalidAllowanceNonce)),
                };
                if allowance.revoked {
                    return Err(fail(VaultProgramError::AllowanceRevoked));
                }
                if allowance.remaining() < amount || state.drained.contains(&allowance_key) {
                    return Err(fail(VaultProgramError::InsufficientAllowance));
                }
                allowance.spent += amount;
                allowance.spend_count += 1;
                writes.insert(allowance_key, allowance.encode().unwrap());
            }
        }

        state.accounts.extend(writes);
        Ok(())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn latest_blockhash(&self) -> Result<Hash, GatewayError> {
        let _guard = self.enter().await?;
        Ok(Hash::new_unique())
    }

    async fn is_blockhash_valid(&self, _blockhash: &Hash) -> Result<bool, GatewayError> {
        let _guard = self.enter().await?;
        Ok(self.state.lock().unwrap().blockhash_valid)
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, GatewayError> {
        let _guard = self.enter().await?;
        Ok(self.state.lock().unwrap().accounts.get(address).cloned())
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, GatewayError> {
        let _guard = self.enter().await?;
        let signature = transaction.signatures[0];
        let mut state = self.state.lock().unwrap();
        state.sent.push(transaction.clone());
        if state.drop_sends {
            return Ok(signature);
        }

        state.slot += 1;
        let err = self.execute(&mut state, transaction).err();
        let slot = state.slot;
        state.statuses.insert(
            signature,
            SignatureStatus {
                slot,
                err,
                commitment_reached: true,
                confirmation: Some("confirmed".to_string()),
            },
        );
        Ok(signature)
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, GatewayError> {
        let _guard = self.enter().await?;
        Ok(self.state.lock().unwrap().statuses.get(signature).cloned())
    }
}

/// Gateway and sender over `ledger` with short test timings
pub fn sender_for(ledger: Arc<MockLedger>) -> Arc<TransactionSender> {
    let policy = RateLimitPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(50),
        ..RateLimitPolicy::default()
    };
    let gateway = Arc::new(LedgerGateway::new(ledger, policy));
    Arc::new(TransactionSender::new(
        gateway,
        ConfirmSettings {
            poll_interval: Duration::from_millis(5),
            confirm_timeout: Duration::from_millis(100),
            blockhash_timeout: Duration::from_millis(100),
        },
    ))
}

pub fn vault_fixture() -> (VaultAddresses, VaultInstructions) {
    let addresses = VaultAddresses::new(Pubkey::new_unique()).expect("casino address");
    (addresses, VaultInstructions::new(addresses))
}

/// Settlement backend over an in-memory store, called without HTTP
pub struct InProcessBackend {
    pub service: Arc<SettlementService>,
    pub events: Mutex<Vec<AllowanceEvent>>,
    events_down: AtomicBool,
}

impl InProcessBackend {
    pub fn new(addresses: Option<VaultAddresses>) -> Arc<Self> {
        let settlement = SettlementConfig {
            retry_backoff_base_ms: 0,
            retry_backoff_max_ms: 0,
            ..SettlementConfig::default()
        };
        let service = SettlementService::new(
            Arc::new(InMemorySettlementStore::new()),
            BettingConfig::default(),
            settlement,
            addresses,
        );
        Arc::new(Self {
            service: Arc::new(service),
            events: Mutex::new(Vec::new()),
            events_down: AtomicBool::new(false),
        })
    }

    /// Allowance events are refused while set
    pub fn events_down(&self, down: bool) {
        self.events_down.store(down, Ordering::SeqCst);
    }

    pub async fn place_bet(
        &self,
        user: &Pubkey,
        choice: &str,
        stake: u64,
        allowance: Option<&Pubkey>,
    ) -> Uuid {
        let request: CreateBetRequest = serde_json::from_value(json!({
            "user_wallet": user.to_string(),
            "vault_address": null,
            "allowance_pda": allowance.map(|a| a.to_string()),
            "stake_amount": stake,
            "stake_token": "SOL",
            "choice": choice,
        }))
        .expect("valid bet request");
        self.service.create_bet(request, None).await.expect("bet accepted").bet_id
    }

    pub async fn bet(&self, bet_id: Uuid) -> processor::domain::Bet {
        convert(&self.service.get_bet(bet_id).await.expect("bet exists")).expect("bet converts")
    }

    pub async fn audit_events(&self, bet_id: Uuid) -> Vec<String> {
        self.service
            .bet_audit_trail(bet_id)
            .await
            .expect("audit trail")
            .into_iter()
            .map(|entry| entry.event_type)
            .collect()
    }
}

/// Map between the two crates' wire types the way HTTP would
fn convert<A: Serialize, B: DeserializeOwned>(value: &A) -> Result<B> {
    Ok(serde_json::from_value(serde_json::to_value(value)?)?)
}

#[async_trait]
impl SettlementApi for InProcessBackend {
    async fn claim_pending(&self, processor_id: &str, limit: usize) -> Result<PendingBetsResponse> {
        let claimed = self.service.claim_pending(processor_id, limit as i64).await?;
        convert(&claimed)
    }

    async fn report_batch(&self, batch_id: Uuid, req: &UpdateBatchRequest) -> Result<BatchReport> {
        match self.service.apply_batch_update(batch_id, convert(req)?).await {
            Ok(response) => Ok(BatchReport::Applied(convert(&response)?)),
            Err(AppError::Transition(TransitionError { entity: "batch", .. })) => {
                Ok(BatchReport::AlreadyFinal)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn stuck_batches(
        &self,
        older_than_seconds: i64,
        limit: usize,
    ) -> Result<Vec<StuckBatch>> {
        let stuck = self.service.stuck_batches(Some(older_than_seconds), limit as i64).await?;
        convert(&stuck)
    }

    async fn record_allowance_event(&self, event: &AllowanceEvent) -> Result<()> {
        if self.events_down.load(Ordering::SeqCst) {
            anyhow::bail!("backend returned 503 Service Unavailable");
        }
        self.events.lock().unwrap().push(event.clone());
        self.service.record_allowance_event(convert(event)?).await?;
        Ok(())
    }
}
