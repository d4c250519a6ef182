//! Single chokepoint for every ledger RPC the processor makes.
//!
//! Calls pass through [`AdmissionControl`] one at a time. Rate-limited
//! responses push a shared cooldown and are retried with exponential backoff;
//! any other failure goes straight back to the caller.

mod admission;
mod error;
mod rpc;

pub use admission::{AdmissionControl, SlotGuard};
pub use error::GatewayError;
pub use rpc::{LedgerRpc, SignatureStatus};

use backoff::backoff::Backoff;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction};
use std::future::Future;
use std::sync::Arc;

use crate::retry_strategy::RateLimitPolicy;

pub struct LedgerGateway {
    rpc: Arc<dyn LedgerRpc>,
    admission: AdmissionControl,
    policy: RateLimitPolicy,
}

impl LedgerGateway {
    pub fn new(rpc: Arc<dyn LedgerRpc>, policy: RateLimitPolicy) -> Self {
        Self {
            rpc,
            admission: AdmissionControl::new(),
            policy,
        }
    }

    pub fn admission(&self) -> &AdmissionControl {
        &self.admission
    }

    /// Issue `f` under admission control, retrying rate-limit responses
    pub async fn call<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut backoff = self.policy.create_backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let slot = self.admission.acquire().await?;

            match f().await {
                Err(error) if error.is_rate_limited() => {
                    let delay = backoff.next_backoff().unwrap_or(self.policy.max_delay);
                    slot.extend_cooldown(delay).await;
                    drop(slot);

                    metrics::counter!("ledger_rate_limited_total", "op" => op).increment(1);

                    if !self.policy.should_retry(attempt) {
                        tracing::error!(
                            op,
                            attempts = attempt,
                            error = %error,
                            "Ledger RPC still rate limited, giving up"
                        );
                        return Err(GatewayError::RateLimitExhausted { op, attempts: attempt });
                    }
                    tracing::warn!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Ledger RPC rate limited, backing off"
                    );
                }
                Err(error) => {
                    metrics::counter!("ledger_rpc_errors_total", "op" => op).increment(1);
                    return Err(error);
                }
                Ok(value) => return Ok(value),
            }
        }
    }

    pub async fn latest_blockhash(&self) -> Result<Hash, GatewayError> {
        self.call("get_latest_blockhash", || self.rpc.latest_blockhash()).await
    }

    pub async fn is_blockhash_valid(&self, blockhash: &Hash) -> Result<bool, GatewayError> {
        self.call("is_blockhash_valid", || self.rpc.is_blockhash_valid(blockhash))
            .await
    }

    pub async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, GatewayError> {
        self.call("get_account", || self.rpc.account_data(address)).await
    }

    pub async fn send_transaction(
        &self,
        transaction: &Transaction,
    ) -> Result<Signature, GatewayError> {
        self.call("send_transaction", || self.rpc.send_transaction(transaction))
            .await
    }

    pub async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, GatewayError> {
        self.call("get_signature_status", || self.rpc.signature_status(signature))
            .await
    }
}
