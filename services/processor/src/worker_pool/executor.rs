//! Turning resolved bets into one ledger transaction

use async_trait::async_trait;
use shared::errors::ErrorCode;
use solana_sdk::hash::Hash;
use solana_sdk::signature::{Keypair, Signature, Signer};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::allowance::AllowanceManager;
use crate::ledger_gateway::{GatewayError, SignatureStatus};
use crate::retry_strategy::Failure;
use crate::solana_instructions::VaultInstructions;
use crate::solana_tx::{PreparedTransaction, SubmitOutcome, TransactionSender};

use super::outcome::ResolvedBet;

/// A batch ready to submit
pub struct Prepared {
    /// Known before sending so it can be persisted first
    pub signature: String,
    pub included: Vec<ResolvedBet>,
    /// Bets screened out before submission, with the reason
    pub rejected: Vec<(ResolvedBet, Failure)>,
    /// Bet owning each instruction, by instruction index
    pub instruction_owners: Vec<Uuid>,
    /// Recent blockhash the transaction was signed against
    pub blockhash: Option<String>,
    transaction: Option<PreparedTransaction>,
}

impl Prepared {
    pub fn new(signature: String, included: Vec<ResolvedBet>) -> Self {
        let instruction_owners = included.iter().map(|resolved| resolved.bet.bet_id).collect();
        Self {
            signature,
            included,
            rejected: Vec::new(),
            instruction_owners,
            blockhash: None,
            transaction: None,
        }
    }

    /// Bet whose instruction sits at `index`
    pub fn owner_of(&self, index: usize) -> Option<Uuid> {
        self.instruction_owners.get(index).copied()
    }
}

/// Executes batches against a ledger
#[async_trait]
pub trait LedgerExecutor: Send + Sync {
    /// Screen and sign; a whole-batch failure is returned as `Err`
    async fn prepare(&self, bets: Vec<ResolvedBet>) -> Result<Prepared, Failure>;

    async fn submit(&self, prepared: &Prepared) -> SubmitOutcome;

    /// Current status of an earlier submission
    async fn status(&self, signature: &str) -> Result<Option<SignatureStatus>, GatewayError>;

    /// Whether a transaction signed against `blockhash` can no longer land
    async fn blockhash_expired(&self, blockhash: &str) -> Result<bool, GatewayError>;
}

/// Settles against the vault program: spend for every bet, payout for winners
pub struct OnChainExecutor {
    allowances: Arc<AllowanceManager>,
    instructions: VaultInstructions,
    sender: Arc<TransactionSender>,
    processor: Arc<Keypair>,
}

impl OnChainExecutor {
    pub fn new(
        allowances: Arc<AllowanceManager>,
        instructions: VaultInstructions,
        sender: Arc<TransactionSender>,
        processor: Arc<Keypair>,
    ) -> Self {
        Self {
            allowances,
            instructions,
            sender,
            processor,
        }
    }
}

#[async_trait]
impl LedgerExecutor for OnChainExecutor {
    async fn prepare(&self, bets: Vec<ResolvedBet>) -> Result<Prepared, Failure> {
        let processor = self.processor.pubkey();
        let mut reserved = HashMap::new();
        let mut included = Vec::new();
        let mut rejected = Vec::new();
        let mut owners = Vec::new();
        let mut instructions = Vec::new();

        for resolved in bets {
            let screened = self
                .allowances
                .check_spend(
                    &resolved.user,
                    resolved.allowance,
                    &resolved.token,
                    resolved.stake,
                    &mut reserved,
                )
                .await;
            let allowance = match screened {
                Ok(allowance) => allowance,
                Err(e) => {
                    tracing::warn!(
                        bet_id = %resolved.bet.bet_id,
                        error = %e,
                        "Bet screened out before submission"
                    );
                    rejected.push((resolved, e.failure()));
                    continue;
                }
            };

            let built = self
                .instructions
                .token_accounts(&resolved.user, &resolved.token)
                .and_then(|tokens| {
                    let mut ixs = vec![self.instructions.spend_from_allowance(
                        &resolved.user,
                        &allowance,
                        tokens,
                        &processor,
                        resolved.stake,
                        &resolved.key,
                    )?];
                    if resolved.won {
                        ixs.push(self.instructions.payout(
                            &resolved.user,
                            tokens,
                            &processor,
                            resolved.payout,
                            &resolved.key,
                        )?);
                    }
                    Ok(ixs)
                });

            match built {
                Ok(ixs) => {
                    owners.extend(std::iter::repeat(resolved.bet.bet_id).take(ixs.len()));
                    instructions.extend(ixs);
                    included.push(resolved);
                }
                Err(e) => {
                    let failure = Failure::terminal(ErrorCode::CONTRACT_INVALID_PDA, e.to_string());
                    rejected.push((resolved, failure));
                }
            }
        }

        if included.is_empty() {
            return Ok(Prepared {
                signature: String::new(),
                included,
                rejected,
                instruction_owners: owners,
                blockhash: None,
                transaction: None,
            });
        }

        let transaction = self
            .sender
            .prepare(&instructions, &self.processor)
            .await
            .map_err(|e| Failure::from(&e))?;

        tracing::debug!(
            signature = %transaction.signature,
            instructions = instructions.len(),
            bets = included.len(),
            "Batch transaction signed"
        );

        Ok(Prepared {
            signature: transaction.signature.to_string(),
            included,
            rejected,
            instruction_owners: owners,
            blockhash: Some(transaction.blockhash.to_string()),
            transaction: Some(transaction),
        })
    }

    async fn submit(&self, prepared: &Prepared) -> SubmitOutcome {
        match &prepared.transaction {
            Some(transaction) => self.sender.send_and_confirm(transaction).await,
            None => SubmitOutcome::Unresolved {
                reason: "batch has no signed transaction".to_string(),
            },
        }
    }

    async fn status(&self, signature: &str) -> Result<Option<SignatureStatus>, GatewayError> {
        let signature = Signature::from_str(signature)
            .map_err(|e| GatewayError::Other(format!("invalid signature {}: {}", signature, e)))?;
        self.sender.gateway().signature_status(&signature).await
    }

    async fn blockhash_expired(&self, blockhash: &str) -> Result<bool, GatewayError> {
        let blockhash = Hash::from_str(blockhash)
            .map_err(|e| GatewayError::Other(format!("invalid blockhash {}: {}", blockhash, e)))?;
        Ok(!self.sender.gateway().is_blockhash_valid(&blockhash).await?)
    }
}
