//! Ledger RPC over one or more Solana endpoints with failover

use anyhow::Result;
use async_trait::async_trait;
use solana_client::{client_error::ClientError, nonblocking::rpc_client::RpcClient};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair, Signature},
    transaction::Transaction,
};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::ledger_gateway::{AdmissionControl, GatewayError, LedgerRpc, SignatureStatus};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Primary endpoint first, then fallbacks
pub struct SolanaRpc {
    endpoints: Vec<Endpoint>,
    commitment: CommitmentConfig,
}

struct Endpoint {
    client: Arc<RpcClient>,
    url: String,
    last_health_check: RwLock<Instant>,
    is_healthy: AtomicBool,
}

impl SolanaRpc {
    pub fn new(
        rpc_urls: &[String],
        commitment: CommitmentConfig,
        request_timeout: Duration,
    ) -> Result<Self> {
        if rpc_urls.is_empty() {
            anyhow::bail!("at least one RPC url is required");
        }

        let endpoints = rpc_urls
            .iter()
            .map(|url| Endpoint {
                client: Arc::new(RpcClient::new_with_timeout_and_commitment(
                    url.clone(),
                    request_timeout,
                    commitment,
                )),
                url: url.clone(),
                last_health_check: RwLock::new(Instant::now()),
                is_healthy: AtomicBool::new(true),
            })
            .collect();

        Ok(Self { endpoints, commitment })
    }

    /// Healthy endpoints in configured order, then the unhealthy ones
    fn ordered(&self) -> impl Iterator<Item = &Endpoint> {
        let healthy = self.endpoints.iter().filter(|e| e.is_healthy.load(Ordering::Relaxed));
        let unhealthy = self.endpoints.iter().filter(|e| !e.is_healthy.load(Ordering::Relaxed));
        healthy.chain(unhealthy)
    }

    fn mark_unhealthy(&self, endpoint: &Endpoint) {
        if endpoint.is_healthy.swap(false, Ordering::Relaxed) {
            metrics::counter!("rpc_failovers_total").increment(1);
            tracing::warn!(url = %endpoint.url, "Marked RPC endpoint as unhealthy");
        }
    }

    /// Run `f` against each endpoint until one answers. Only connectivity
    /// failures move on to the next endpoint.
    async fn with_failover<T, F, Fut>(&self, f: F) -> Result<T, GatewayError>
    where
        F: Fn(Arc<RpcClient>) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut last_error = GatewayError::Transport("no RPC endpoints configured".to_string());
        for endpoint in self.ordered() {
            match f(endpoint.client.clone()).await {
                Ok(value) => {
                    endpoint.is_healthy.store(true, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(error) => {
                    let error = GatewayError::from(error);
                    if !error.is_connectivity() {
                        return Err(error);
                    }
                    tracing::warn!(
                        url = %endpoint.url,
                        error = %error,
                        "RPC endpoint unreachable, failing over"
                    );
                    self.mark_unhealthy(endpoint);
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }

    /// Checks endpoints whose last check is older than a minute. Each check
    /// takes an admission slot like any other RPC.
    pub async fn health_check_all(&self, admission: &AdmissionControl) {
        for endpoint in &self.endpoints {
            {
                let mut last_check = endpoint.last_health_check.write().await;
                if last_check.elapsed() <= HEALTH_CHECK_INTERVAL {
                    continue;
                }
                *last_check = Instant::now();
            }

            let healthy = match admission.with_slot(|| endpoint.client.get_health()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::warn!(url = %endpoint.url, error = %e, "RPC health check failed");
                    false
                }
                Err(_) => continue,
            };
            endpoint.is_healthy.store(healthy, Ordering::Relaxed);
            tracing::debug!(url = %endpoint.url, healthy, "RPC health checked");
        }
    }
}

#[async_trait]
impl LedgerRpc for SolanaRpc {
    async fn latest_blockhash(&self) -> Result<Hash, GatewayError> {
        self.with_failover(|client| async move { client.get_latest_blockhash().await })
            .await
    }

    async fn is_blockhash_valid(&self, blockhash: &Hash) -> Result<bool, GatewayError> {
        let blockhash = *blockhash;
        let commitment = self.commitment;
        self.with_failover(|client| async move {
            client.is_blockhash_valid(&blockhash, commitment).await
        })
        .await
    }

    async fn account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, GatewayError> {
        let address = *address;
        let commitment = self.commitment;
        self.with_failover(|client| async move {
            client
                .get_account_with_commitment(&address, commitment)
                .await
                .map(|response| response.value.map(|account| account.data))
        })
        .await
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, GatewayError> {
        self.with_failover(|client| {
            let transaction = transaction.clone();
            async move { client.send_transaction(&transaction).await }
        })
        .await
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<SignatureStatus>, GatewayError> {
        let signature = *signature;
        let commitment = self.commitment;
        self.with_failover(|client| async move {
            // Searched beyond the recent status cache so older landings are found
            let response = client.get_signature_statuses_with_history(&[signature]).await?;
            let status = response.value.into_iter().next().flatten();
            Ok::<_, ClientError>(status.map(|status| SignatureStatus {
                slot: status.slot,
                commitment_reached: status.satisfies_commitment(commitment),
                confirmation: status
                    .confirmation_status
                    .as_ref()
                    .map(|level| format!("{:?}", level).to_lowercase()),
                err: status.err,
            }))
        })
        .await
    }
}

pub fn load_processor_keypair(path: &str) -> Result<Keypair> {
    let keypair = read_keypair_file(Path::new(path))
        .map_err(|e| anyhow::anyhow!("Failed to load processor keypair from {}: {}", path, e))?;
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_an_endpoint() {
        let rpc = SolanaRpc::new(&[], CommitmentConfig::confirmed(), Duration::from_secs(1));
        assert!(rpc.is_err());
    }

    #[test]
    fn test_unhealthy_endpoints_tried_last() {
        let rpc = SolanaRpc::new(
            &["http://primary:8899".to_string(), "http://fallback:8899".to_string()],
            CommitmentConfig::confirmed(),
            Duration::from_secs(1),
        )
        .unwrap();

        let order: Vec<&str> = rpc.ordered().map(|e| e.url.as_str()).collect();
        assert_eq!(order, vec!["http://primary:8899", "http://fallback:8899"]);

        rpc.mark_unhealthy(&rpc.endpoints[0]);
        let order: Vec<&str> = rpc.ordered().map(|e| e.url.as_str()).collect();
        assert_eq!(order, vec!["http://fallback:8899", "http://primary:8899"]);
    }

    #[test]
    fn test_missing_keypair_file() {
        assert!(load_processor_keypair("/nonexistent/processor.json").is_err());
    }
}
