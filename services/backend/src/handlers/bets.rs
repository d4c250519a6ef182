use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use shared::errors::ServiceError;
use uuid::Uuid;

use crate::{
    domain::{AuditLogEntry, Bet, CreateBetRequest},
    errors::Result,
    extractors::ValidatedJson,
    state::AppState,
};

/// Wallet forwarded by the authenticating proxy in front of the API
pub const SESSION_WALLET_HEADER: &str = "x-user-wallet";

#[derive(Debug, Deserialize)]
pub struct ListBetsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub user_wallet: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateBetResponse {
    pub bet: Bet,
}

fn session_wallet(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_WALLET_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub async fn create_bet(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<CreateBetRequest>,
) -> Result<Json<CreateBetResponse>> {
    tracing::debug!(
        stake_amount = %req.stake_amount,
        choice = %req.choice,
        "Creating bet"
    );

    let bet = state.settlement.create_bet(req, session_wallet(&headers)).await?;
    Ok(Json(CreateBetResponse { bet }))
}

pub async fn get_bet(State(state): State<AppState>, Path(bet_id): Path<Uuid>) -> Result<Json<Bet>> {
    let bet = state.settlement.get_bet(bet_id).await?;
    tracing::debug!(%bet_id, status = %bet.status, "Bet retrieved");
    Ok(Json(bet))
}

pub async fn get_bet_audit(
    State(state): State<AppState>,
    Path(bet_id): Path<Uuid>,
) -> Result<Json<Vec<AuditLogEntry>>> {
    Ok(Json(state.settlement.bet_audit_trail(bet_id).await?))
}

pub async fn list_user_bets(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListBetsQuery>,
) -> Result<Json<Vec<Bet>>> {
    let user_wallet = query
        .user_wallet
        .or_else(|| session_wallet(&headers))
        .ok_or_else(|| ServiceError::invalid_input("user_wallet is required"))?;
    let limit = query.limit.unwrap_or(20);
    let offset = query.offset.unwrap_or(0);

    let bets = state.settlement.list_user_bets(&user_wallet, limit, offset).await?;
    tracing::debug!(user_wallet = %user_wallet, bet_count = bets.len(), "Retrieved user bets");
    Ok(Json(bets))
}
