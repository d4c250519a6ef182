//! Endpoints the settlement processor drives

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    domain::{
        AllowanceEvent, AuditLogEntry, PendingBetsResponse, StuckBatch, UpdateBatchRequest,
        UpdateBatchResponse,
    },
    errors::Result,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct PendingBetsQuery {
    pub limit: Option<i64>,
    pub processor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StuckBatchesQuery {
    pub older_than_seconds: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn get_pending_bets(
    State(state): State<AppState>,
    Query(query): Query<PendingBetsQuery>,
) -> Result<Json<PendingBetsResponse>> {
    let processor_id = query
        .processor_id
        .unwrap_or_else(|| "processor-unknown".to_string());
    let limit = query
        .limit
        .unwrap_or(state.config.settlement.max_claim_size);

    let response = state.settlement.claim_pending(&processor_id, limit).await?;
    metrics::gauge!("last_claim_size").set(response.bets.len() as f64);
    Ok(Json(response))
}

pub async fn update_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(req): Json<UpdateBatchRequest>,
) -> Result<Json<UpdateBatchResponse>> {
    tracing::info!(
        %batch_id,
        status = %req.status,
        bet_results = req.bet_results.len(),
        "Batch update received"
    );
    Ok(Json(state.settlement.apply_batch_update(batch_id, req).await?))
}

pub async fn get_stuck_batches(
    State(state): State<AppState>,
    Query(query): Query<StuckBatchesQuery>,
) -> Result<Json<Vec<StuckBatch>>> {
    let limit = query.limit.unwrap_or(20);
    Ok(Json(
        state
            .settlement
            .stuck_batches(query.older_than_seconds, limit)
            .await?,
    ))
}

pub async fn record_allowance_event(
    State(state): State<AppState>,
    Json(event): Json<AllowanceEvent>,
) -> Result<Json<AuditLogEntry>> {
    Ok(Json(state.settlement.record_allowance_event(event).await?))
}
