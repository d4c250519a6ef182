//! Program Derived Address (PDA) derivation for the vault program
//!
//! Every seed the vault program uses lives in this module. Derivation is pure:
//! the same inputs always produce the same `(address, bump)` pair, bit-for-bit
//! equal to what the program computes on-chain.

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::program_ids::{SPL_ASSOCIATED_TOKEN_ACCOUNT_PROGRAM_ID, SPL_TOKEN_PROGRAM_ID};
use crate::types::BetId;

pub const CASINO_SEED: &[u8] = b"casino";
pub const VAULT_SEED: &[u8] = b"vault";
pub const VAULT_AUTHORITY_SEED: &[u8] = b"vault-authority";
pub const CASINO_VAULT_SEED: &[u8] = b"casino-vault";
pub const RATE_LIMITER_SEED: &[u8] = b"rate-limiter";
pub const ALLOWANCE_NONCE_SEED: &[u8] = b"allowance-nonce";
pub const ALLOWANCE_SEED: &[u8] = b"allowance";
pub const PROCESSED_BET_SEED: &[u8] = b"processed-bet";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PdaError {
    /// No bump in 255..=0 yields an off-curve address (or a seed exceeds 32 bytes)
    #[error("no program address derivable for seeds [{seeds}] under program {program_id}")]
    AddressNotDerivable { seeds: String, program_id: Pubkey },

    #[error("casino PDA mismatch: derived {derived}, expected {expected} (check VAULT_PROGRAM_ID)")]
    CasinoMismatch { derived: Pubkey, expected: Pubkey },
}

/// Derive a program address from raw seeds
pub fn derive(seeds: &[&[u8]], program_id: &Pubkey) -> Result<(Pubkey, u8), PdaError> {
    Pubkey::try_find_program_address(seeds, program_id).ok_or_else(|| {
        PdaError::AddressNotDerivable {
            seeds: describe_seeds(seeds),
            program_id: *program_id,
        }
    })
}

fn describe_seeds(seeds: &[&[u8]]) -> String {
    seeds
        .iter()
        .map(|seed| match std::str::from_utf8(seed) {
            Ok(text) if text.chars().all(|c| c.is_ascii_graphic()) => text.to_string(),
            _ => format!("0x{}", seed.iter().map(|b| format!("{:02x}", b)).collect::<String>()),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Derive the casino singleton PDA
pub fn derive_casino(program_id: &Pubkey) -> Result<(Pubkey, u8), PdaError> {
    derive(&[CASINO_SEED], program_id)
}

/// Addresses of one vault program deployment.
///
/// Holds the program id and the casino singleton so callers don't re-derive
/// the casino for every per-user address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultAddresses {
    program_id: Pubkey,
    casino: Pubkey,
    casino_bump: u8,
}

impl VaultAddresses {
    pub fn new(program_id: Pubkey) -> Result<Self, PdaError> {
        let (casino, casino_bump) = derive_casino(&program_id)?;
        Ok(Self {
            program_id,
            casino,
            casino_bump,
        })
    }

    /// Startup self-check against an operator-supplied casino address.
    ///
    /// A mismatch means the configured program id is not the deployment the
    /// operator thinks it is, which is fatal.
    pub fn verify_casino(&self, expected: Option<&Pubkey>) -> Result<(), PdaError> {
        match expected {
            Some(expected) if *expected != self.casino => Err(PdaError::CasinoMismatch {
                derived: self.casino,
                expected: *expected,
            }),
            _ => Ok(()),
        }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    pub fn casino(&self) -> &Pubkey {
        &self.casino
    }

    pub fn casino_bump(&self) -> u8 {
        self.casino_bump
    }

    pub fn vault(&self, user: &Pubkey) -> Result<(Pubkey, u8), PdaError> {
        derive(&[VAULT_SEED, self.casino.as_ref(), user.as_ref()], &self.program_id)
    }

    pub fn vault_authority(&self) -> Result<(Pubkey, u8), PdaError> {
        derive(&[VAULT_AUTHORITY_SEED, self.casino.as_ref()], &self.program_id)
    }

    pub fn casino_vault(&self) -> Result<(Pubkey, u8), PdaError> {
        derive(&[CASINO_VAULT_SEED, self.casino.as_ref()], &self.program_id)
    }

    pub fn rate_limiter(&self, user: &Pubkey) -> Result<(Pubkey, u8), PdaError> {
        derive(&[RATE_LIMITER_SEED, user.as_ref()], &self.program_id)
    }

    pub fn allowance_nonce_registry(&self, user: &Pubkey) -> Result<(Pubkey, u8), PdaError> {
        derive(
            &[ALLOWANCE_NONCE_SEED, user.as_ref(), self.casino.as_ref()],
            &self.program_id,
        )
    }

    /// Allowance PDA for an explicit nonce (little-endian u64 seed)
    pub fn allowance(&self, user: &Pubkey, nonce: u64) -> Result<(Pubkey, u8), PdaError> {
        derive(
            &[
                ALLOWANCE_SEED,
                user.as_ref(),
                self.casino.as_ref(),
                &nonce.to_le_bytes(),
            ],
            &self.program_id,
        )
    }

    /// Allowance currently in force given a registry's `next_nonce`.
    ///
    /// `next_nonce == 0` means no allowance was ever approved.
    pub fn active_allowance(
        &self,
        user: &Pubkey,
        next_nonce: u64,
    ) -> Result<Option<(Pubkey, u8)>, PdaError> {
        match next_nonce.checked_sub(1) {
            Some(nonce) => self.allowance(user, nonce).map(Some),
            None => Ok(None),
        }
    }

    /// Marker account the program creates per settled bet to reject duplicates
    pub fn processed_bet(&self, bet_id: &BetId) -> Result<(Pubkey, u8), PdaError> {
        derive(&[PROCESSED_BET_SEED, bet_id.as_seed()], &self.program_id)
    }
}

/// Associated token account of `owner` for `mint` under the SPL token program
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Result<Pubkey, PdaError> {
    derive(
        &[owner.as_ref(), SPL_TOKEN_PROGRAM_ID.as_ref(), mint.as_ref()],
        &SPL_ASSOCIATED_TOKEN_ACCOUNT_PROGRAM_ID,
    )
    .map(|(address, _)| address)
}
