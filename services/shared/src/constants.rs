/// Shared constants for the vault settlement pipeline
///
/// This module centralizes all magic numbers and configuration constants
/// to prevent inconsistencies between the backend, the processor and the
/// on-chain vault program.

use solana_sdk::pubkey;
use solana_sdk::pubkey::Pubkey;

/// Minimum bet amount in lamports (0.01 SOL)
///
/// Below this amount, transaction fees would consume a significant
/// percentage of the stake.
pub const MIN_BET_LAMPORTS: u64 = 10_000_000;

/// Maximum bet amount in lamports (1000 SOL)
pub const MAX_BET_LAMPORTS: u64 = 1_000_000_000_000;

/// Maximum allowance duration in seconds (24 hours)
///
/// Mirrors the on-chain check; the program rejects longer durations with
/// `AllowanceDurationTooLong`.
pub const MAX_ALLOWANCE_DURATION_SECS: i64 = 86400;

/// Maximum allowance amount in lamports (10,000 SOL)
pub const MAX_ALLOWANCE_AMOUNT_LAMPORTS: u64 = 10_000_000_000_000;

/// Wrapped SOL mint address (native SOL represented as SPL token)
pub const WRAPPED_SOL_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");

/// Maximum bet ID length (UUID without hyphens = 32 chars)
///
/// Solana PDA seeds have a 32-byte limit per seed.
pub const MAX_BET_ID_LENGTH: usize = 32;

/// Hard ceiling on bets settled by one ledger transaction.
///
/// Each bet contributes up to two instructions (spend + payout); more than
/// five bets overflows the transaction size and compute limits.
pub const MAX_BETS_PER_TX: usize = 5;

/// Winning bets are paid out at this multiple of the stake.
pub const PAYOUT_MULTIPLIER: u64 = 2;

/// Maximum retry attempts for failed bets
pub const MAX_BET_RETRIES: i32 = 5;

/// Base backoff delay in milliseconds before a requeued bet is claimable again
pub const RETRY_BACKOFF_BASE_MS: i64 = 2_000;

/// Maximum backoff delay in milliseconds for requeued bets
pub const RETRY_BACKOFF_MAX_MS: i64 = 60_000;
