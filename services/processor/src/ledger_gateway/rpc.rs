use async_trait::async_trait;
use solana_sdk::{
    hash::Hash,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{Transaction, TransactionError},
};

use super::GatewayError;

/// Status of a sent transaction as reported by the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureStatus {
    pub slot: u64,
    pub err: Option<TransactionError>,
    /// The configured commitment level has been reached
    pub commitment_reached: bool,
    pub confirmation: Option<String>,
}

/// Raw ledger RPC surface. Implementations make one request per call and
/// never retry; retries and admission belong to [`super::LedgerGateway`].
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash, GatewayError>;

    async fn is_blockhash_valid(&self, blockhash: &Hash) -> Result<bool, GatewayError>;

    /// Account data, or `None` when the account does not exist
    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, GatewayError>;

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, GatewayError>;

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, GatewayError>;
}
