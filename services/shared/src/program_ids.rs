//! Solana program IDs and public keys used across services
//!
//! Centralizes all program ID constants to ensure consistency
//! and make it easier to update when needed.

use anyhow::{Context, Result};
use solana_sdk::pubkey;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

/// SPL Token Program ID
pub const SPL_TOKEN_PROGRAM_ID: Pubkey = pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");

/// SPL Associated Token Account Program ID
pub const SPL_ASSOCIATED_TOKEN_ACCOUNT_PROGRAM_ID: Pubkey =
    pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Parse a base58 public key, naming the setting it came from on failure
pub fn parse_pubkey(setting: &str, value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value.trim())
        .with_context(|| format!("Failed to parse {} as a valid Pubkey", setting))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spl_program_id_constants_are_distinct() {
        assert_ne!(SPL_TOKEN_PROGRAM_ID, SPL_ASSOCIATED_TOKEN_ACCOUNT_PROGRAM_ID);
        assert_eq!(
            SPL_TOKEN_PROGRAM_ID.to_string(),
            "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"
        );
    }

    #[test]
    fn test_parse_pubkey_reports_setting() {
        let err = parse_pubkey("EXPECTED_CASINO_PDA", "not-base58").unwrap_err();
        assert!(err.to_string().contains("EXPECTED_CASINO_PDA"));

        let key = Pubkey::new_unique();
        assert_eq!(parse_pubkey("X", &format!(" {} ", key)).unwrap(), key);
    }
}
