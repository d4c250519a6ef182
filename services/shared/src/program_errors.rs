//! Vault program error codes
//!
//! Anchor numbers custom errors from 6000 in declaration order. The order
//! below must match the program's `#[error_code]` enum exactly.

use thiserror::Error;

use crate::errors::ErrorCode;

/// Offset Anchor adds to the index of a user-defined error
pub const ANCHOR_ERROR_OFFSET: u32 = 6000;

/// `Custom(0)` from the system program's create_account: the target address
/// already holds an account.
pub const ACCOUNT_ALREADY_IN_USE: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u32)]
pub enum VaultProgramError {
    #[error("insufficient balance in vault")]
    InsufficientBalance = 6000,
    #[error("invalid bet amount")]
    InvalidBetAmount = 6001,
    #[error("allowance has expired")]
    AllowanceExpired = 6002,
    #[error("allowance has been revoked")]
    AllowanceRevoked = 6003,
    #[error("insufficient allowance remaining")]
    InsufficientAllowance = 6004,
    #[error("allowance duration exceeds maximum")]
    AllowanceDurationTooLong = 6005,
    #[error("allowance amount exceeds maximum")]
    AllowanceAmountTooHigh = 6006,
    #[error("rate limit exceeded")]
    RateLimitExceeded = 6007,
    #[error("invalid token account owner")]
    InvalidTokenAccountOwner = 6008,
    #[error("invalid token mint")]
    InvalidTokenMint = 6009,
    #[error("token account is frozen")]
    TokenAccountFrozen = 6010,
    #[error("token account is not initialized")]
    TokenAccountNotInitialized = 6011,
    #[error("arithmetic overflow")]
    ArithmeticOverflow = 6012,
    #[error("arithmetic underflow")]
    ArithmeticUnderflow = 6013,
    #[error("unauthorized processor")]
    UnauthorizedProcessor = 6014,
    #[error("unauthorized authority")]
    UnauthorizedAuthority = 6015,
    #[error("casino is paused")]
    CasinoPaused = 6016,
    #[error("invalid vault PDA")]
    InvalidVaultPDA = 6017,
    #[error("invalid casino vault PDA")]
    InvalidCasinoVaultPDA = 6018,
    #[error("bet id already processed")]
    DuplicateBetId = 6019,
    #[error("invalid bet id")]
    InvalidBetId = 6020,
    #[error("token mint does not match allowance")]
    TokenMintMismatch = 6021,
    #[error("invalid allowance PDA")]
    InvalidAllowancePDA = 6022,
    #[error("token delegation missing")]
    MissingTokenDelegation = 6023,
    #[error("token account missing")]
    MissingTokenAccount = 6024,
    #[error("allowance nonce does not match registry")]
    InvalidAllowanceNonce = 6025,
}

impl VaultProgramError {
    const ALL: [VaultProgramError; 26] = [
        Self::InsufficientBalance,
        Self::InvalidBetAmount,
        Self::AllowanceExpired,
        Self::AllowanceRevoked,
        Self::InsufficientAllowance,
        Self::AllowanceDurationTooLong,
        Self::AllowanceAmountTooHigh,
        Self::RateLimitExceeded,
        Self::InvalidTokenAccountOwner,
        Self::InvalidTokenMint,
        Self::TokenAccountFrozen,
        Self::TokenAccountNotInitialized,
        Self::ArithmeticOverflow,
        Self::ArithmeticUnderflow,
        Self::UnauthorizedProcessor,
        Self::UnauthorizedAuthority,
        Self::CasinoPaused,
        Self::InvalidVaultPDA,
        Self::InvalidCasinoVaultPDA,
        Self::DuplicateBetId,
        Self::InvalidBetId,
        Self::TokenMintMismatch,
        Self::InvalidAllowancePDA,
        Self::MissingTokenDelegation,
        Self::MissingTokenAccount,
        Self::InvalidAllowanceNonce,
    ];

    /// Decode a `Custom(code)` instruction error raised by the vault program
    pub fn from_custom_code(code: u32) -> Option<Self> {
        let index = code.checked_sub(ANCHOR_ERROR_OFFSET)? as usize;
        Self::ALL.get(index).copied()
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    /// Worth retrying the same bet later without operator involvement
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::InvalidAllowanceNonce)
    }

    pub fn error_code(self) -> ErrorCode {
        match self {
            Self::InsufficientBalance => ErrorCode::CONTRACT_INSUFFICIENT_BALANCE,
            Self::InvalidBetAmount => ErrorCode::VALIDATION_INVALID_AMOUNT,
            Self::AllowanceExpired => ErrorCode::CONTRACT_ALLOWANCE_EXPIRED,
            Self::AllowanceRevoked => ErrorCode::CONTRACT_ALLOWANCE_REVOKED,
            Self::InsufficientAllowance => ErrorCode::CONTRACT_INSUFFICIENT_ALLOWANCE,
            Self::AllowanceDurationTooLong => ErrorCode::VALIDATION_ALLOWANCE_DURATION_TOO_LONG,
            Self::AllowanceAmountTooHigh => ErrorCode::VALIDATION_ALLOWANCE_AMOUNT_OUT_OF_RANGE,
            Self::RateLimitExceeded => ErrorCode::CONTRACT_RATE_LIMITED,
            Self::CasinoPaused => ErrorCode::CONTRACT_CASINO_PAUSED,
            Self::DuplicateBetId => ErrorCode::CONTRACT_DUPLICATE_BET,
            Self::InvalidBetId => ErrorCode::VALIDATION_INVALID_BET_ID,
            Self::UnauthorizedProcessor | Self::UnauthorizedAuthority => {
                ErrorCode::CONTRACT_UNAUTHORIZED_SIGNER
            }
            Self::InvalidVaultPDA | Self::InvalidCasinoVaultPDA | Self::InvalidAllowancePDA => {
                ErrorCode::CONTRACT_INVALID_PDA
            }
            Self::MissingTokenAccount | Self::TokenAccountNotInitialized => {
                ErrorCode::CONTRACT_ACCOUNT_NOT_FOUND
            }
            Self::InvalidAllowanceNonce => ErrorCode::CONTRACT_NONCE_RACE,
            Self::InvalidTokenAccountOwner
            | Self::InvalidTokenMint
            | Self::TokenAccountFrozen
            | Self::ArithmeticOverflow
            | Self::ArithmeticUnderflow
            | Self::TokenMintMismatch
            | Self::MissingTokenDelegation => ErrorCode::CONTRACT_EXECUTION_FAILED,
        }
    }
}
