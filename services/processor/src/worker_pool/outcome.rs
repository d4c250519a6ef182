//! Coinflip outcome and payout resolution

use rand::Rng;
use shared::errors::ErrorCode;
use shared::{BetId, CoinSide, TokenType, PAYOUT_MULTIPLIER};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::Bet;
use crate::retry_strategy::Failure;

/// Source of coin faces
pub trait CoinDrawer: Send + Sync {
    fn draw(&self) -> CoinSide;
}

/// Unbiased draw from the thread-local RNG
pub struct ThreadRngDrawer;

impl CoinDrawer for ThreadRngDrawer {
    fn draw(&self) -> CoinSide {
        if rand::thread_rng().gen_bool(0.5) {
            CoinSide::Heads
        } else {
            CoinSide::Tails
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("invalid user wallet {0}")]
    InvalidWallet(String),

    #[error("invalid allowance address {0}")]
    InvalidAllowance(String),

    #[error("invalid choice {0}")]
    InvalidChoice(String),

    #[error("invalid stake token {0}")]
    InvalidToken(String),

    #[error("invalid stake amount {0}")]
    InvalidStake(i64),

    #[error("invalid recorded outcome {0}")]
    InvalidOutcome(String),

    #[error("payout for stake {0} overflows")]
    PayoutOverflow(u64),
}

impl ResolveError {
    pub fn failure(&self) -> Failure {
        let code = match self {
            ResolveError::InvalidWallet(_) => ErrorCode::VALIDATION_INVALID_WALLET,
            ResolveError::InvalidAllowance(_) => ErrorCode::CONTRACT_INVALID_PDA,
            ResolveError::InvalidChoice(_) => ErrorCode::VALIDATION_INVALID_CHOICE,
            ResolveError::InvalidToken(_) => ErrorCode::VALIDATION_INVALID_TOKEN,
            ResolveError::InvalidStake(_) | ResolveError::PayoutOverflow(_) => {
                ErrorCode::VALIDATION_INVALID_AMOUNT
            }
            ResolveError::InvalidOutcome(_) => ErrorCode::INTERNAL_UNEXPECTED,
        };
        Failure::terminal(code, self.to_string())
    }
}

/// A bet with its outcome fixed and everything needed to settle it
#[derive(Debug, Clone)]
pub struct ResolvedBet {
    pub bet: Bet,
    pub key: BetId,
    pub user: Pubkey,
    pub allowance: Option<Pubkey>,
    pub token: TokenType,
    pub stake: u64,
    pub choice: CoinSide,
    pub drawn: CoinSide,
    pub won: bool,
    pub payout: u64,
}

impl ResolvedBet {
    pub fn payout_i64(&self) -> i64 {
        // Bounded by `resolve_with`
        self.payout as i64
    }
}

/// Resolve a bet, drawing a face only if none was recorded earlier
pub fn resolve(bet: &Bet, drawer: &dyn CoinDrawer) -> Result<ResolvedBet, ResolveError> {
    let drawn = match &bet.drawn_outcome {
        Some(recorded) => CoinSide::from_str(recorded)
            .map_err(|_| ResolveError::InvalidOutcome(recorded.clone()))?,
        None => drawer.draw(),
    };
    resolve_with(bet, drawn)
}

/// Resolve a bet against a known face
pub fn resolve_with(bet: &Bet, drawn: CoinSide) -> Result<ResolvedBet, ResolveError> {
    let user = Pubkey::from_str(&bet.user_wallet)
        .map_err(|_| ResolveError::InvalidWallet(bet.user_wallet.clone()))?;
    let allowance = bet
        .allowance_pda
        .as_deref()
        .map(|address| {
            Pubkey::from_str(address)
                .map_err(|_| ResolveError::InvalidAllowance(address.to_string()))
        })
        .transpose()?;
    let choice = CoinSide::from_str(&bet.choice)
        .map_err(|_| ResolveError::InvalidChoice(bet.choice.clone()))?;
    let token = TokenType::from_str(&bet.stake_token)
        .map_err(|_| ResolveError::InvalidToken(bet.stake_token.clone()))?;
    let stake = u64::try_from(bet.stake_amount)
        .ok()
        .filter(|stake| *stake > 0)
        .ok_or(ResolveError::InvalidStake(bet.stake_amount))?;

    let won = choice == drawn;
    let payout = if won {
        stake
            .checked_mul(PAYOUT_MULTIPLIER)
            .filter(|payout| i64::try_from(*payout).is_ok())
            .ok_or(ResolveError::PayoutOverflow(stake))?
    } else {
        0
    };

    Ok(ResolvedBet {
        bet: bet.clone(),
        key: BetId::new(bet.bet_id),
        user,
        allowance,
        token,
        stake,
        choice,
        drawn,
        won,
        payout,
    })
}
