//! Allowance lookup, screening, approval and revocation.
//!
//! The active allowance for a user is the one at `next_nonce - 1` in their
//! nonce registry. Approvals pass client-side checks before anything is sent
//! and name their nonce explicitly; when another approval lands first the
//! nonce is re-read and the approval retried a bounded number of times.

use chrono::Utc;
use shared::accounts::{
    AccountLayout, Allowance, AllowanceNonceRegistry, Casino, CodecError, SpendDenial,
};
use shared::errors::ErrorCode;
use shared::pda::PdaError;
use shared::{TokenType, MAX_ALLOWANCE_AMOUNT_LAMPORTS, MAX_ALLOWANCE_DURATION_SECS};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::TransactionError,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{AllowanceEvent, AllowanceEventKind};
use crate::ledger_gateway::{GatewayError, LedgerGateway};
use crate::retry_strategy::{classify_transaction_error, is_nonce_race, Failure};
use crate::solana_instructions::VaultInstructions;
use crate::solana_tx::{SubmitOutcome, TransactionSender};
use crate::worker_pool::SettlementApi;

/// Approvals re-read the nonce at most this many times
pub const MAX_NONCE_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum AllowanceError {
    #[error("allowance duration {requested}s must be within (0, {max}]")]
    DurationTooLong { requested: i64, max: i64 },

    #[error("allowance amount {amount} lamports is outside (0, {max}]")]
    AmountOutOfRange { amount: u64, max: u64 },

    #[error("casino is paused")]
    CasinoPaused,

    #[error("casino account {0} not found")]
    CasinoNotFound(Pubkey),

    #[error("no active allowance for {0}")]
    NotFound(Pubkey),

    #[error("allowance {0} is revoked")]
    Revoked(Pubkey),

    #[error("allowance {address} expired at {expires_at}")]
    Expired { address: Pubkey, expires_at: i64 },

    #[error("allowance {address} has {remaining} lamports left, {requested} needed")]
    Insufficient {
        address: Pubkey,
        remaining: u64,
        requested: u64,
    },

    #[error("allowance {address} is for mint {actual}, bet uses {expected}")]
    TokenMismatch {
        address: Pubkey,
        expected: Pubkey,
        actual: Pubkey,
    },

    #[error("allowance nonce still racing after {attempts} attempts")]
    NonceRace { attempts: u32 },

    #[error("allowance transaction failed: {0}")]
    Rejected(TransactionError),

    #[error("allowance transaction not confirmed: {0}")]
    Unconfirmed(String),

    #[error("allowance {allowance} changed in {signature}, event not recorded: {reason}")]
    EventNotRecorded {
        allowance: Pubkey,
        signature: Signature,
        reason: String,
    },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Pda(#[from] PdaError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl AllowanceError {
    fn denial(address: Pubkey, denial: SpendDenial) -> Self {
        match denial {
            SpendDenial::Revoked => AllowanceError::Revoked(address),
            SpendDenial::Expired { expires_at } => AllowanceError::Expired { address, expires_at },
            SpendDenial::Insufficient { remaining, requested } => AllowanceError::Insufficient {
                address,
                remaining,
                requested,
            },
        }
    }

    /// Settlement classification when this error keeps a bet from settling
    pub fn failure(&self) -> Failure {
        let message = self.to_string();
        match self {
            AllowanceError::DurationTooLong { .. } => {
                Failure::terminal(ErrorCode::VALIDATION_ALLOWANCE_DURATION_TOO_LONG, message)
            }
            AllowanceError::AmountOutOfRange { .. } => {
                Failure::terminal(ErrorCode::VALIDATION_ALLOWANCE_AMOUNT_OUT_OF_RANGE, message)
            }
            AllowanceError::CasinoPaused => {
                Failure::terminal(ErrorCode::VALIDATION_CASINO_PAUSED, message)
            }
            AllowanceError::CasinoNotFound(_) => {
                Failure::terminal(ErrorCode::CONTRACT_ACCOUNT_NOT_FOUND, message)
            }
            AllowanceError::NotFound(_) => {
                Failure::terminal(ErrorCode::NOT_FOUND_ALLOWANCE, message)
            }
            AllowanceError::Revoked(_) => {
                Failure::terminal(ErrorCode::VALIDATION_ALLOWANCE_REVOKED, message)
            }
            AllowanceError::Expired { .. } => {
                Failure::terminal(ErrorCode::VALIDATION_ALLOWANCE_EXPIRED, message)
            }
            AllowanceError::Insufficient { .. } => {
                Failure::terminal(ErrorCode::VALIDATION_INSUFFICIENT_ALLOWANCE, message)
            }
            AllowanceError::TokenMismatch { .. } => {
                Failure::terminal(ErrorCode::VALIDATION_INVALID_TOKEN, message)
            }
            AllowanceError::NonceRace { .. } => {
                Failure::retryable(ErrorCode::CONTRACT_NONCE_RACE, message)
            }
            AllowanceError::Rejected(error) if is_nonce_race(error) => {
                Failure::retryable(ErrorCode::CONTRACT_NONCE_RACE, message)
            }
            AllowanceError::Rejected(error) => classify_transaction_error(error).1,
            AllowanceError::Unconfirmed(_) => {
                Failure::retryable(ErrorCode::NETWORK_CONFIRMATION_TIMEOUT, message)
            }
            AllowanceError::EventNotRecorded { .. } => {
                Failure::retryable(ErrorCode::NETWORK_BACKEND_UNAVAILABLE, message)
            }
            AllowanceError::Gateway(error) => Failure::from(error),
            AllowanceError::Pda(_) => Failure::terminal(ErrorCode::CONTRACT_INVALID_PDA, message),
            AllowanceError::Codec(_) => {
                Failure::terminal(ErrorCode::INTERNAL_MALFORMED_ACCOUNT, message)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApproveRequest {
    pub amount: u64,
    pub duration_seconds: i64,
    pub token: TokenType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovedAllowance {
    pub address: Pubkey,
    pub nonce: u64,
    pub signature: Signature,
    pub expires_at: i64,
}

pub struct AllowanceManager {
    sender: Arc<TransactionSender>,
    instructions: VaultInstructions,
    /// Every confirmed approve and revoke is recorded here
    events: Arc<dyn SettlementApi>,
    processor_id: String,
}

impl AllowanceManager {
    pub fn new(
        sender: Arc<TransactionSender>,
        instructions: VaultInstructions,
        processor_id: impl Into<String>,
        events: Arc<dyn SettlementApi>,
    ) -> Self {
        Self {
            sender,
            instructions,
            events,
            processor_id: processor_id.into(),
        }
    }

    fn gateway(&self) -> &LedgerGateway {
        self.sender.gateway()
    }

    async fn fetch<T: AccountLayout>(&self, address: &Pubkey) -> Result<Option<T>, AllowanceError> {
        match self.gateway().account_data(address).await? {
            Some(data) => Ok(Some(T::decode(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn casino(&self) -> Result<Casino, AllowanceError> {
        let address = *self.instructions.addresses().casino();
        self.fetch::<Casino>(&address)
            .await?
            .ok_or(AllowanceError::CasinoNotFound(address))
    }

    pub async fn nonce_registry(
        &self,
        user: &Pubkey,
    ) -> Result<Option<AllowanceNonceRegistry>, AllowanceError> {
        let (address, _) = self.instructions.addresses().allowance_nonce_registry(user)?;
        self.fetch(&address).await
    }

    /// Nonce the next approval must use; zero before the first approval
    pub async fn next_nonce(&self, user: &Pubkey) -> Result<u64, AllowanceError> {
        Ok(self.nonce_registry(user).await?.map_or(0, |registry| registry.next_nonce))
    }

    pub async fn active_allowance(&self, user: &Pubkey) -> Result<Option<Pubkey>, AllowanceError> {
        let next_nonce = self.next_nonce(user).await?;
        Ok(self
            .instructions
            .addresses()
            .active_allowance(user, next_nonce)?
            .map(|(address, _)| address))
    }

    pub async fn fetch_allowance(
        &self,
        address: &Pubkey,
    ) -> Result<Option<Allowance>, AllowanceError> {
        self.fetch(address).await
    }

    /// Whether `address` can cover `amount` right now; a missing account cannot
    pub async fn can_spend(&self, address: &Pubkey, amount: u64) -> Result<bool, AllowanceError> {
        let now = Utc::now().timestamp();
        Ok(self
            .fetch_allowance(address)
            .await?
            .is_some_and(|allowance| allowance.can_spend(amount, now)))
    }

    /// Screen a spend before it goes into a batch.
    ///
    /// `reserved` carries amounts already claimed against each allowance by
    /// earlier bets of the same batch. Returns the allowance to spend from.
    pub async fn check_spend(
        &self,
        user: &Pubkey,
        hint: Option<Pubkey>,
        token: &TokenType,
        amount: u64,
        reserved: &mut HashMap<Pubkey, u64>,
    ) -> Result<Pubkey, AllowanceError> {
        let address = match hint {
            Some(address) => address,
            None => self
                .active_allowance(user)
                .await?
                .ok_or(AllowanceError::NotFound(*user))?,
        };
        let allowance = self
            .fetch_allowance(&address)
            .await?
            .ok_or(AllowanceError::NotFound(*user))?;

        let expected_mint = token.ledger_mint();
        if allowance.token_mint != expected_mint {
            return Err(AllowanceError::TokenMismatch {
                address,
                expected: expected_mint,
                actual: allowance.token_mint,
            });
        }

        let already = reserved.get(&address).copied().unwrap_or(0);
        let needed = already.saturating_add(amount);
        if let Some(denial) = allowance.spend_denial(needed, Utc::now().timestamp()) {
            return Err(AllowanceError::denial(address, denial));
        }
        reserved.insert(address, needed);
        Ok(address)
    }

    fn validate(&self, request: &ApproveRequest) -> Result<(), AllowanceError> {
        if request.duration_seconds <= 0 || request.duration_seconds > MAX_ALLOWANCE_DURATION_SECS {
            return Err(AllowanceError::DurationTooLong {
                requested: request.duration_seconds,
                max: MAX_ALLOWANCE_DURATION_SECS,
            });
        }
        if request.amount == 0 || request.amount > MAX_ALLOWANCE_AMOUNT_LAMPORTS {
            return Err(AllowanceError::AmountOutOfRange {
                amount: request.amount,
                max: MAX_ALLOWANCE_AMOUNT_LAMPORTS,
            });
        }
        Ok(())
    }

    /// Approve a new allowance signed by `user`. Active once this returns.
    ///
    /// A landed approval whose event cannot be recorded is reported as
    /// `EventNotRecorded`, naming the allowance that now exists.
    #[tracing::instrument(
        skip(self, user, request),
        fields(user = %user.pubkey(), amount = request.amount)
    )]
    pub async fn approve(
        &self,
        user: &Keypair,
        request: ApproveRequest,
    ) -> Result<ApprovedAllowance, AllowanceError> {
        self.validate(&request)?;
        if self.casino().await?.paused {
            return Err(AllowanceError::CasinoPaused);
        }

        let owner = user.pubkey();
        let token_mint = request.token.ledger_mint();

        for attempt in 1..=MAX_NONCE_ATTEMPTS {
            let nonce = self.next_nonce(&owner).await?;
            let (instruction, address) = self.instructions.approve_allowance(
                &owner,
                request.amount,
                request.duration_seconds,
                &token_mint,
                nonce,
            )?;
            let prepared = self.sender.prepare(&[instruction], user).await?;

            match self.sender.send_and_confirm(&prepared).await {
                SubmitOutcome::Confirmed { .. } => {
                    let expires_at = match self.fetch_allowance(&address).await {
                        Ok(Some(allowance)) => allowance.expires_at,
                        _ => Utc::now().timestamp() + request.duration_seconds,
                    };
                    metrics::counter!("allowances_approved_total").increment(1);
                    tracing::info!(
                        allowance = %address,
                        nonce,
                        signature = %prepared.signature,
                        "Allowance approved"
                    );

                    self.record(address, prepared.signature, AllowanceEvent {
                        kind: AllowanceEventKind::Approved,
                        processor_id: self.processor_id.clone(),
                        user_wallet: owner.to_string(),
                        allowance_pda: address.to_string(),
                        nonce: Some(nonce),
                        amount: Some(request.amount),
                        token_mint: Some(token_mint.to_string()),
                        expires_at: Some(expires_at),
                        solana_tx_id: Some(prepared.signature.to_string()),
                    })
                    .await?;

                    return Ok(ApprovedAllowance {
                        address,
                        nonce,
                        signature: prepared.signature,
                        expires_at,
                    });
                }
                SubmitOutcome::Failed { error } if is_nonce_race(&error) => {
                    metrics::counter!("allowance_nonce_races_total").increment(1);
                    tracing::warn!(
                        nonce,
                        attempt,
                        "Allowance nonce taken concurrently, re-reading"
                    );
                }
                SubmitOutcome::Failed { error } => return Err(AllowanceError::Rejected(error)),
                SubmitOutcome::Expired => {
                    return Err(AllowanceError::Unconfirmed("blockhash expired".to_string()))
                }
                SubmitOutcome::Unresolved { reason } => {
                    return Err(AllowanceError::Unconfirmed(reason))
                }
            }
        }

        Err(AllowanceError::NonceRace {
            attempts: MAX_NONCE_ATTEMPTS,
        })
    }

    #[tracing::instrument(skip(self, user), fields(user = %user.pubkey()))]
    pub async fn revoke(
        &self,
        user: &Keypair,
        allowance: &Pubkey,
    ) -> Result<Signature, AllowanceError> {
        let owner = user.pubkey();
        let instruction = self.instructions.revoke_allowance(&owner, allowance);
        let prepared = self.sender.prepare(&[instruction], user).await?;

        match self.sender.send_and_confirm(&prepared).await {
            SubmitOutcome::Confirmed { .. } => {
                tracing::info!(%allowance, signature = %prepared.signature, "Allowance revoked");
                self.record(*allowance, prepared.signature, AllowanceEvent {
                    kind: AllowanceEventKind::Revoked,
                    processor_id: self.processor_id.clone(),
                    user_wallet: owner.to_string(),
                    allowance_pda: allowance.to_string(),
                    nonce: None,
                    amount: None,
                    token_mint: None,
                    expires_at: None,
                    solana_tx_id: Some(prepared.signature.to_string()),
                })
                .await?;
                Ok(prepared.signature)
            }
            SubmitOutcome::Failed { error } => Err(AllowanceError::Rejected(error)),
            SubmitOutcome::Expired => {
                Err(AllowanceError::Unconfirmed("blockhash expired".to_string()))
            }
            SubmitOutcome::Unresolved { reason } => Err(AllowanceError::Unconfirmed(reason)),
        }
    }

    async fn record(
        &self,
        allowance: Pubkey,
        signature: Signature,
        event: AllowanceEvent,
    ) -> Result<(), AllowanceError> {
        let Err(e) = self.events.record_allowance_event(&event).await else {
            return Ok(());
        };

        tracing::error!(%allowance, %signature, error = %e, "Failed to record allowance event");
        metrics::counter!("allowance_events_unrecorded_total").increment(1);
        Err(AllowanceError::EventNotRecorded {
            allowance,
            signature,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::instruction::InstructionError;

    #[test]
    fn test_denials_map_to_terminal_failures() {
        let address = Pubkey::new_unique();

        let failure = AllowanceError::denial(address, SpendDenial::Revoked).failure();
        assert_eq!(failure.code, ErrorCode::VALIDATION_ALLOWANCE_REVOKED);
        assert!(!failure.retryable);

        let failure =
            AllowanceError::denial(address, SpendDenial::Expired { expires_at: 1 }).failure();
        assert_eq!(failure.code, ErrorCode::VALIDATION_ALLOWANCE_EXPIRED);

        let failure = AllowanceError::denial(
            address,
            SpendDenial::Insufficient {
                remaining: 10,
                requested: 20,
            },
        )
        .failure();
        assert_eq!(failure.code, ErrorCode::VALIDATION_INSUFFICIENT_ALLOWANCE);
        assert!(failure.message.contains("10 lamports left"));
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(AllowanceError::NonceRace { attempts: 3 }.failure().retryable);
        assert!(AllowanceError::Unconfirmed("expired".into()).failure().retryable);
        assert!(AllowanceError::Gateway(GatewayError::Timeout("slow".into())).failure().retryable);

        let rejected = AllowanceError::Rejected(TransactionError::InstructionError(
            0,
            InstructionError::Custom(6016),
        ));
        let failure = rejected.failure();
        assert!(!failure.retryable);
        assert_eq!(failure.code, ErrorCode::CONTRACT_CASINO_PAUSED);
    }

    #[test]
    fn test_existing_allowance_on_approve_is_a_nonce_race() {
        let rejected = AllowanceError::Rejected(TransactionError::InstructionError(
            0,
            InstructionError::Custom(0),
        ));
        let failure = rejected.failure();
        assert!(failure.retryable);
        assert_eq!(failure.code, ErrorCode::CONTRACT_NONCE_RACE);
    }

    #[test]
    fn test_unrecorded_event_is_retryable_and_names_the_allowance() {
        let allowance = Pubkey::new_unique();
        let error = AllowanceError::EventNotRecorded {
            allowance,
            signature: Signature::default(),
            reason: "backend down".to_string(),
        };
        let failure = error.failure();
        assert!(failure.retryable);
        assert_eq!(failure.code, ErrorCode::NETWORK_BACKEND_UNAVAILABLE);
        assert!(failure.message.contains(&allowance.to_string()));
    }
}
