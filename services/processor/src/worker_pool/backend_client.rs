//! Backend API client for worker communication
//!
//! The settlement backend owns every bet and batch status; the processor only
//! claims work and reports what happened on the ledger.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    AllowanceEvent, PendingBetsResponse, StuckBatch, UpdateBatchRequest, UpdateBatchResponse,
};

/// How the backend took a batch report
#[derive(Debug, Clone)]
pub enum BatchReport {
    Applied(UpdateBatchResponse),
    /// The batch was already terminal; nothing was changed
    AlreadyFinal,
}

/// Settlement operations the processor drives
#[async_trait]
pub trait SettlementApi: Send + Sync {
    /// Claim up to `limit` pending bets into a new batch
    async fn claim_pending(&self, processor_id: &str, limit: usize) -> Result<PendingBetsResponse>;

    async fn report_batch(&self, batch_id: Uuid, req: &UpdateBatchRequest) -> Result<BatchReport>;

    /// Batches left `submitted` for longer than `older_than_seconds`
    async fn stuck_batches(&self, older_than_seconds: i64, limit: usize) -> Result<Vec<StuckBatch>>;

    async fn record_allowance_event(&self, event: &AllowanceEvent) -> Result<()>;
}

/// Client for communicating with the backend API
pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build backend HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SettlementApi for BackendClient {
    async fn claim_pending(&self, processor_id: &str, limit: usize) -> Result<PendingBetsResponse> {
        let url = format!("{}/api/external/bets/pending", self.base_url);

        tracing::debug!(url = %url, limit, processor_id = %processor_id, "Claiming pending bets");

        let resp: PendingBetsResponse = self
            .http
            .get(url)
            .query(&[("limit", limit.to_string()), ("processor_id", processor_id.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp)
    }

    async fn report_batch(&self, batch_id: Uuid, req: &UpdateBatchRequest) -> Result<BatchReport> {
        let url = format!("{}/api/external/batches/{}", self.base_url, batch_id);

        let resp = self.http.post(url).json(req).send().await?;
        if resp.status() == StatusCode::CONFLICT {
            let body = resp.text().await.unwrap_or_default();
            tracing::info!(
                %batch_id,
                status = ?req.status,
                body = %body,
                "Batch already final, report ignored"
            );
            return Ok(BatchReport::AlreadyFinal);
        }

        let applied: UpdateBatchResponse = resp.error_for_status()?.json().await?;
        if applied.error_count > 0 {
            tracing::warn!(
                %batch_id,
                errors = applied.error_count,
                "Backend rejected some bet results"
            );
        }
        Ok(BatchReport::Applied(applied))
    }

    async fn stuck_batches(
        &self,
        older_than_seconds: i64,
        limit: usize,
    ) -> Result<Vec<StuckBatch>> {
        let url = format!("{}/api/external/batches/stuck", self.base_url);

        let batches = self
            .http
            .get(url)
            .query(&[
                ("older_than_seconds", older_than_seconds.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(batches)
    }

    async fn record_allowance_event(&self, event: &AllowanceEvent) -> Result<()> {
        let url = format!("{}/api/external/allowances/events", self.base_url);

        self.http
            .post(url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
