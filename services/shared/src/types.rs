/// Type-safe wrappers for domain primitives
///
/// These types prevent common errors by enforcing validation at construction time
/// and providing checked arithmetic operations.

use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, system_program};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::constants::*;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Bet ID too long: {length} chars (max {max})")]
    BetIdTooLong { length: usize, max: usize },

    #[error("Invalid bet ID format: {0}")]
    InvalidBetIdFormat(String),

    #[error("Bet amount out of range: {amount} (min: {min}, max: {max})")]
    BetAmountOutOfRange { amount: u64, min: u64, max: u64 },

    #[error("Bet amount overflow in operation")]
    BetAmountOverflow,

    #[error("Invalid token type")]
    InvalidTokenType,

    #[error("Invalid coin side: {0} (expected heads or tails)")]
    InvalidCoinSide(String),
}

/// Type-safe bet identifier with validation
///
/// Enforces maximum length and format validation to prevent PDA derivation errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BetId(String);

impl BetId {
    /// Create a new BetId from a UUID
    pub fn new(uuid: Uuid) -> Self {
        // Remove hyphens to save space in PDA seeds (36 -> 32 chars)
        Self(uuid.simple().to_string())
    }

    /// Get the inner string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Seed bytes for the processed-bet PDA
    pub fn as_seed(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Convert back to UUID if possible
    pub fn to_uuid(&self) -> Result<Uuid, ValidationError> {
        Uuid::parse_str(&self.0).map_err(|_| ValidationError::InvalidBetIdFormat(self.0.clone()))
    }
}

impl TryFrom<String> for BetId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let normalized = value.replace('-', "");

        if normalized.len() > MAX_BET_ID_LENGTH {
            return Err(ValidationError::BetIdTooLong {
                length: normalized.len(),
                max: MAX_BET_ID_LENGTH,
            });
        }

        Uuid::parse_str(&normalized)
            .map_err(|_| ValidationError::InvalidBetIdFormat(value.clone()))?;

        Ok(Self(normalized))
    }
}

impl From<Uuid> for BetId {
    fn from(uuid: Uuid) -> Self {
        Self::new(uuid)
    }
}

impl std::fmt::Display for BetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe lamport amount with overflow protection
///
/// Provides checked arithmetic operations to prevent integer overflow vulnerabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LamportAmount(u64);

impl LamportAmount {
    /// Create a new LamportAmount with validation
    pub fn new(amount: u64) -> Result<Self, ValidationError> {
        if !(MIN_BET_LAMPORTS..=MAX_BET_LAMPORTS).contains(&amount) {
            return Err(ValidationError::BetAmountOutOfRange {
                amount,
                min: MIN_BET_LAMPORTS,
                max: MAX_BET_LAMPORTS,
            });
        }
        Ok(Self(amount))
    }

    /// Create without validation (for internal use)
    pub fn new_unchecked(amount: u64) -> Self {
        Self(amount)
    }

    /// Get the raw lamport value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Checked addition
    pub fn checked_add(&self, other: LamportAmount) -> Result<Self, ValidationError> {
        self.0
            .checked_add(other.0)
            .map(Self::new_unchecked)
            .ok_or(ValidationError::BetAmountOverflow)
    }

    /// Checked multiplication
    pub fn checked_mul(&self, multiplier: u64) -> Result<Self, ValidationError> {
        self.0
            .checked_mul(multiplier)
            .map(Self::new_unchecked)
            .ok_or(ValidationError::BetAmountOverflow)
    }

    /// Convert to SOL (as f64), display only
    pub fn to_sol(&self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }
}

impl TryFrom<u64> for LamportAmount {
    type Error = ValidationError;

    fn try_from(amount: u64) -> Result<Self, Self::Error> {
        Self::new(amount)
    }
}

impl From<LamportAmount> for u64 {
    fn from(amount: LamportAmount) -> Self {
        amount.0
    }
}

impl std::fmt::Display for LamportAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} lamports ({:.9} SOL)", self.0, self.to_sol())
    }
}

/// Token type discriminator
///
/// Distinguishes between native SOL, wrapped SOL, and other SPL tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    /// Native SOL (transferred via system program)
    NativeSOL,

    /// Wrapped SOL (SPL token representation of native SOL)
    WrappedSOL,

    /// Other SPL token (USDC, USDT, etc.)
    SPL(Pubkey),
}

impl TokenType {
    /// Get the mint address for SPL tokens
    pub fn mint(&self) -> Option<Pubkey> {
        match self {
            TokenType::NativeSOL => None,
            TokenType::WrappedSOL => Some(WRAPPED_SOL_MINT),
            TokenType::SPL(mint) => Some(*mint),
        }
    }

    /// Mint as stored in an allowance account.
    ///
    /// The vault program records native SOL allowances with the system
    /// program id in place of a mint.
    pub fn ledger_mint(&self) -> Pubkey {
        self.mint().unwrap_or(system_program::ID)
    }

    /// Inverse of [`TokenType::ledger_mint`]
    pub fn from_ledger_mint(mint: Pubkey) -> Self {
        if mint == system_program::ID {
            TokenType::NativeSOL
        } else if mint == WRAPPED_SOL_MINT {
            TokenType::WrappedSOL
        } else {
            TokenType::SPL(mint)
        }
    }
}

impl FromStr for TokenType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SOL" => Ok(TokenType::NativeSOL),
            "WSOL" => Ok(TokenType::WrappedSOL),
            mint_str => mint_str
                .parse::<Pubkey>()
                .map(TokenType::SPL)
                .map_err(|_| ValidationError::InvalidTokenType),
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::NativeSOL => write!(f, "SOL"),
            TokenType::WrappedSOL => write!(f, "WSOL"),
            TokenType::SPL(mint) => write!(f, "{}", mint),
        }
    }
}

/// One face of the coin in a coinflip bet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinSide {
    Heads,
    Tails,
}

impl CoinSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoinSide::Heads => "heads",
            CoinSide::Tails => "tails",
        }
    }
}

impl FromStr for CoinSide {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "heads" => Ok(CoinSide::Heads),
            "tails" => Ok(CoinSide::Tails),
            _ => Err(ValidationError::InvalidCoinSide(value.to_string())),
        }
    }
}

impl std::fmt::Display for CoinSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
