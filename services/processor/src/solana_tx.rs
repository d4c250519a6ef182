//! Transaction signing, submission and confirmation polling

use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    signature::{Keypair, Signature, Signer},
    transaction::{Transaction, TransactionError},
};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

use crate::config::RpcConfig;
use crate::ledger_gateway::{GatewayError, LedgerGateway};

#[derive(Debug, Clone)]
pub struct ConfirmSettings {
    pub poll_interval: Duration,
    /// How long to wait for the commitment level before checking blockhash expiry
    pub confirm_timeout: Duration,
    /// Upper bound on waiting for the blockhash to expire
    pub blockhash_timeout: Duration,
}

impl From<&RpcConfig> for ConfirmSettings {
    fn from(config: &RpcConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.confirm_poll_interval_ms),
            confirm_timeout: Duration::from_secs(config.confirm_timeout_seconds),
            blockhash_timeout: Duration::from_secs(config.blockhash_expiry_timeout_seconds),
        }
    }
}

/// Final state of one submission attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Confirmed { slot: u64, confirmation: Option<String> },
    /// The ledger executed the transaction and rejected it
    Failed { error: TransactionError },
    /// The blockhash expired without the transaction landing
    Expired,
    /// Could not tell whether it landed within the polling bounds
    Unresolved { reason: String },
}

/// A signed transaction whose signature is known before sending
pub struct PreparedTransaction {
    pub transaction: Transaction,
    pub signature: Signature,
    pub blockhash: Hash,
}

pub struct TransactionSender {
    gateway: Arc<LedgerGateway>,
    settings: ConfirmSettings,
}

impl TransactionSender {
    pub fn new(gateway: Arc<LedgerGateway>, settings: ConfirmSettings) -> Self {
        Self { gateway, settings }
    }

    pub fn gateway(&self) -> &Arc<LedgerGateway> {
        &self.gateway
    }

    /// Sign `instructions` with `payer` as the only signer and fee payer
    pub async fn prepare(
        &self,
        instructions: &[Instruction],
        payer: &Keypair,
    ) -> Result<PreparedTransaction, GatewayError> {
        let blockhash = self.gateway.latest_blockhash().await?;
        let transaction = Transaction::new_signed_with_payer(
            instructions,
            Some(&payer.pubkey()),
            &[payer],
            blockhash,
        );
        let signature = transaction.signatures.first().copied().unwrap_or_default();
        Ok(PreparedTransaction {
            transaction,
            signature,
            blockhash,
        })
    }

    /// Send and poll until the transaction confirms, fails or provably expires
    #[tracing::instrument(skip(self, prepared), fields(signature = %prepared.signature))]
    pub async fn send_and_confirm(&self, prepared: &PreparedTransaction) -> SubmitOutcome {
        match self.gateway.send_transaction(&prepared.transaction).await {
            Ok(_) => tracing::debug!("Transaction sent"),
            Err(GatewayError::Transaction(error)) => {
                tracing::warn!(error = %error, "Transaction rejected on send");
                return SubmitOutcome::Failed { error };
            }
            Err(error) => {
                // It may still have reached a leader; polling decides
                tracing::warn!(error = %error, "Send failed, polling for status anyway");
            }
        }

        let deadline = Instant::now() + self.settings.confirm_timeout;
        while Instant::now() < deadline {
            if let Some(outcome) = self.poll_once(&prepared.signature).await {
                return outcome;
            }
            sleep(self.settings.poll_interval).await;
        }

        tracing::warn!(
            timeout_secs = self.settings.confirm_timeout.as_secs(),
            "Confirmation timed out, waiting for blockhash expiry"
        );
        self.await_expiry(prepared).await
    }

    async fn poll_once(&self, signature: &Signature) -> Option<SubmitOutcome> {
        match self.gateway.signature_status(signature).await {
            Ok(Some(status)) => match status.err {
                Some(error) => Some(SubmitOutcome::Failed { error }),
                None if status.commitment_reached => Some(SubmitOutcome::Confirmed {
                    slot: status.slot,
                    confirmation: status.confirmation,
                }),
                None => None,
            },
            Ok(None) => None,
            Err(error) => {
                tracing::debug!(error = %error, "Signature status poll failed");
                None
            }
        }
    }

    /// After the confirmation window: once the blockhash is no longer valid
    /// the transaction can never land, so one last status read settles it
    async fn await_expiry(&self, prepared: &PreparedTransaction) -> SubmitOutcome {
        let deadline = Instant::now() + self.settings.blockhash_timeout;
        while Instant::now() < deadline {
            match self.gateway.is_blockhash_valid(&prepared.blockhash).await {
                Ok(false) => {
                    return match self.gateway.signature_status(&prepared.signature).await {
                        Ok(Some(status)) => match status.err {
                            Some(error) => SubmitOutcome::Failed { error },
                            None if status.commitment_reached => SubmitOutcome::Confirmed {
                                slot: status.slot,
                                confirmation: status.confirmation,
                            },
                            None => SubmitOutcome::Unresolved {
                                reason: format!(
                                    "landed in slot {} below the requested commitment",
                                    status.slot
                                ),
                            },
                        },
                        Ok(None) => SubmitOutcome::Expired,
                        Err(error) => SubmitOutcome::Unresolved {
                            reason: format!("final status read failed: {}", error),
                        },
                    };
                }
                Ok(true) => {
                    if let Some(outcome) = self.poll_once(&prepared.signature).await {
                        return outcome;
                    }
                }
                Err(error) => tracing::debug!(error = %error, "Blockhash validity check failed"),
            }
            sleep(self.settings.poll_interval).await;
        }

        SubmitOutcome::Unresolved {
            reason: format!(
                "blockhash still valid or unknown after {}s",
                self.settings.blockhash_timeout.as_secs()
            ),
        }
    }
}
