//! Simulated ledger for development and testing
//!
//! Every batch confirms immediately under a `SIM_<uuid>` signature. No RPC
//! is ever made.

use async_trait::async_trait;
use uuid::Uuid;

use crate::ledger_gateway::{GatewayError, SignatureStatus};
use crate::retry_strategy::Failure;
use crate::solana_tx::SubmitOutcome;

use super::executor::{LedgerExecutor, Prepared};
use super::outcome::ResolvedBet;

const SIMULATED_PREFIX: &str = "SIM_";

pub struct SimulatedExecutor;

#[async_trait]
impl LedgerExecutor for SimulatedExecutor {
    async fn prepare(&self, bets: Vec<ResolvedBet>) -> Result<Prepared, Failure> {
        for resolved in &bets {
            tracing::trace!(
                bet_id = %resolved.bet.bet_id,
                choice = %resolved.choice.as_str(),
                won = resolved.won,
                payout = resolved.payout,
                "Bet simulated"
            );
        }

        let signature = format!("{}{}", SIMULATED_PREFIX, Uuid::new_v4());
        tracing::debug!(
            signature = %signature,
            bet_count = bets.len(),
            "Simulated Solana transaction"
        );
        Ok(Prepared::new(signature, bets))
    }

    async fn submit(&self, _prepared: &Prepared) -> SubmitOutcome {
        SubmitOutcome::Confirmed {
            slot: 0,
            confirmation: Some("simulated".to_string()),
        }
    }

    async fn status(&self, signature: &str) -> Result<Option<SignatureStatus>, GatewayError> {
        if !signature.starts_with(SIMULATED_PREFIX) {
            return Ok(None);
        }
        Ok(Some(SignatureStatus {
            slot: 0,
            err: None,
            commitment_reached: true,
            confirmation: Some("simulated".to_string()),
        }))
    }

    async fn blockhash_expired(&self, _blockhash: &str) -> Result<bool, GatewayError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bet, BetStatus};
    use crate::worker_pool::outcome::resolve_with;
    use chrono::Utc;
    use shared::CoinSide;
    use solana_sdk::pubkey::Pubkey;

    fn resolved() -> ResolvedBet {
        let bet = Bet {
            bet_id: Uuid::new_v4(),
            created_at: Utc::now(),
            user_wallet: Pubkey::new_unique().to_string(),
            vault_address: Pubkey::new_unique().to_string(),
            allowance_pda: None,
            casino_id: None,
            game_type: "coinflip".to_string(),
            stake_amount: 50_000_000,
            stake_token: "SOL".to_string(),
            choice: "tails".to_string(),
            status: BetStatus::Batched,
            external_batch_id: None,
            solana_tx_id: None,
            retry_count: 0,
            processor_id: None,
            last_error_code: None,
            last_error_message: None,
            payout_amount: None,
            won: None,
            drawn_outcome: None,
            version: 2,
        };
        resolve_with(&bet, CoinSide::Tails).unwrap()
    }

    #[tokio::test]
    async fn test_simulated_batch_confirms() {
        let executor = SimulatedExecutor;
        let prepared = executor.prepare(vec![resolved(), resolved()]).await.unwrap();

        assert!(prepared.signature.starts_with("SIM_"));
        assert_eq!(prepared.included.len(), 2);
        assert!(prepared.rejected.is_empty());
        assert!(matches!(executor.submit(&prepared).await, SubmitOutcome::Confirmed { .. }));

        let status = executor.status(&prepared.signature).await.unwrap().unwrap();
        assert!(status.commitment_reached);
        let foreign = executor.status("5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnb").await;
        assert!(foreign.unwrap().is_none());
        assert!(executor.blockhash_expired("11111111111111111111111111111111").await.unwrap());
    }
}
