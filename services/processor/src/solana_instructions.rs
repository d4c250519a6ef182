//! Vault program instruction builders
//!
//! Account order and argument encoding must match the on-chain program
//! exactly. Arguments are little-endian; strings carry a u32 length prefix.

use shared::accounts::instruction_discriminator;
use shared::pda::{associated_token_address, PdaError, VaultAddresses};
use shared::program_ids::SPL_TOKEN_PROGRAM_ID;
use shared::{BetId, TokenType};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

/// Instruction data: selector followed by the encoded arguments
struct InstructionData(Vec<u8>);

impl InstructionData {
    fn new(name: &str) -> Self {
        Self(instruction_discriminator(name).to_vec())
    }

    fn u64(mut self, value: u64) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn i64(mut self, value: i64) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn pubkey(mut self, value: &Pubkey) -> Self {
        self.0.extend_from_slice(value.as_ref());
        self
    }

    fn string(mut self, value: &str) -> Self {
        self.0.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.0.extend_from_slice(value.as_bytes());
        self
    }

    fn build(self) -> Vec<u8> {
        self.0
    }
}

/// SPL token accounts moved by a spend or payout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAccounts {
    pub user: Pubkey,
    pub casino: Pubkey,
}

/// Builds every instruction the vault program exposes for one deployment
#[derive(Debug, Clone, Copy)]
pub struct VaultInstructions {
    addresses: VaultAddresses,
}

impl VaultInstructions {
    pub fn new(addresses: VaultAddresses) -> Self {
        Self { addresses }
    }

    pub fn addresses(&self) -> &VaultAddresses {
        &self.addresses
    }

    fn program_id(&self) -> Pubkey {
        *self.addresses.program_id()
    }

    fn instruction(&self, accounts: Vec<AccountMeta>, data: InstructionData) -> Instruction {
        Instruction {
            program_id: self.program_id(),
            accounts,
            data: data.build(),
        }
    }

    /// Token accounts for `user` and the casino, `None` for native SOL
    pub fn token_accounts(
        &self,
        user: &Pubkey,
        token: &TokenType,
    ) -> Result<Option<TokenAccounts>, PdaError> {
        match token.mint() {
            None => Ok(None),
            Some(mint) => Ok(Some(TokenAccounts {
                user: associated_token_address(user, &mint)?,
                casino: associated_token_address(self.addresses.casino(), &mint)?,
            })),
        }
    }

    pub fn initialize_casino_vault(&self, authority: &Pubkey) -> Result<Instruction, PdaError> {
        let (vault_authority, _) = self.addresses.vault_authority()?;
        Ok(self.instruction(
            vec![
                AccountMeta::new(*self.addresses.casino(), false),
                AccountMeta::new_readonly(vault_authority, false),
                AccountMeta::new(*authority, true),
                AccountMeta::new_readonly(system_program::ID, false),
            ],
            InstructionData::new("initialize_casino_vault").pubkey(authority),
        ))
    }

    pub fn initialize_vault(&self, user: &Pubkey) -> Result<Instruction, PdaError> {
        Ok(self.instruction(
            self.user_vault_accounts(user)?,
            InstructionData::new("initialize_vault"),
        ))
    }

    pub fn deposit_sol(&self, user: &Pubkey, amount: u64) -> Result<Instruction, PdaError> {
        Ok(self.instruction(
            self.user_vault_accounts(user)?,
            InstructionData::new("deposit_sol").u64(amount),
        ))
    }

    pub fn withdraw_sol(&self, user: &Pubkey, amount: u64) -> Result<Instruction, PdaError> {
        Ok(self.instruction(
            self.user_vault_accounts(user)?,
            InstructionData::new("withdraw_sol").u64(amount),
        ))
    }

    fn user_vault_accounts(&self, user: &Pubkey) -> Result<Vec<AccountMeta>, PdaError> {
        let (vault, _) = self.addresses.vault(user)?;
        Ok(vec![
            AccountMeta::new(vault, false),
            AccountMeta::new_readonly(*self.addresses.casino(), false),
            AccountMeta::new(*user, true),
            AccountMeta::new_readonly(system_program::ID, false),
        ])
    }

    /// Approve an allowance at an explicit nonce. Returns the instruction and
    /// the allowance address it creates.
    pub fn approve_allowance(
        &self,
        user: &Pubkey,
        amount: u64,
        duration_seconds: i64,
        token_mint: &Pubkey,
        nonce: u64,
    ) -> Result<(Instruction, Pubkey), PdaError> {
        let (vault, _) = self.addresses.vault(user)?;
        let (registry, _) = self.addresses.allowance_nonce_registry(user)?;
        let (allowance, _) = self.addresses.allowance(user, nonce)?;
        let (rate_limiter, _) = self.addresses.rate_limiter(user)?;

        let instruction = self.instruction(
            vec![
                AccountMeta::new(vault, false),
                AccountMeta::new_readonly(*self.addresses.casino(), false),
                AccountMeta::new(registry, false),
                AccountMeta::new(allowance, false),
                AccountMeta::new(rate_limiter, false),
                AccountMeta::new(*user, true),
                AccountMeta::new_readonly(system_program::ID, false),
            ],
            InstructionData::new("approve_allowance_v2")
                .u64(amount)
                .i64(duration_seconds)
                .pubkey(token_mint)
                .u64(nonce),
        );
        Ok((instruction, allowance))
    }

    pub fn revoke_allowance(&self, user: &Pubkey, allowance: &Pubkey) -> Instruction {
        self.instruction(
            vec![AccountMeta::new(*allowance, false), AccountMeta::new_readonly(*user, true)],
            InstructionData::new("revoke_allowance"),
        )
    }

    pub fn pause_casino(&self, authority: &Pubkey) -> Instruction {
        self.instruction(
            vec![
                AccountMeta::new(*self.addresses.casino(), false),
                AccountMeta::new_readonly(*authority, true),
            ],
            InstructionData::new("pause_casino"),
        )
    }

    pub fn unpause_casino(&self, authority: &Pubkey) -> Instruction {
        self.instruction(
            vec![
                AccountMeta::new(*self.addresses.casino(), false),
                AccountMeta::new_readonly(*authority, true),
            ],
            InstructionData::new("unpause_casino"),
        )
    }

    /// Debit a bet stake from the user's allowance into the casino vault
    pub fn spend_from_allowance(
        &self,
        user: &Pubkey,
        allowance: &Pubkey,
        tokens: Option<TokenAccounts>,
        processor: &Pubkey,
        amount: u64,
        bet_id: &BetId,
    ) -> Result<Instruction, PdaError> {
        let program_id = self.program_id();
        let (vault, _) = self.addresses.vault(user)?;
        let (processed_bet, _) = self.addresses.processed_bet(bet_id)?;
        let (casino_vault, _) = self.addresses.casino_vault()?;
        let (vault_authority, _) = self.addresses.vault_authority()?;

        let mut accounts = vec![
            AccountMeta::new(vault, false),
            AccountMeta::new(*self.addresses.casino(), false),
            AccountMeta::new(*allowance, false),
            AccountMeta::new(processed_bet, false),
            AccountMeta::new(casino_vault, false),
            AccountMeta::new_readonly(vault_authority, false),
        ];

        // Optional accounts are passed as the program id; they stay writable
        // to match the account constraints on-chain
        let (user_token, casino_token, token_program) = match tokens {
            Some(tokens) => (tokens.user, tokens.casino, SPL_TOKEN_PROGRAM_ID),
            None => (program_id, program_id, program_id),
        };
        accounts.push(AccountMeta::new(user_token, false));
        accounts.push(AccountMeta::new(casino_token, false));
        accounts.push(AccountMeta::new(*processor, true));
        accounts.push(AccountMeta::new_readonly(system_program::ID, false));
        accounts.push(AccountMeta::new_readonly(token_program, false));

        Ok(self.instruction(
            accounts,
            InstructionData::new("spend_from_allowance")
                .u64(amount)
                .string(bet_id.as_str()),
        ))
    }

    /// Pay a winning bet out of the casino vault into the user's vault
    pub fn payout(
        &self,
        user: &Pubkey,
        tokens: Option<TokenAccounts>,
        processor: &Pubkey,
        amount: u64,
        bet_id: &BetId,
    ) -> Result<Instruction, PdaError> {
        let program_id = self.program_id();
        let (vault, _) = self.addresses.vault(user)?;
        let (processed_bet, _) = self.addresses.processed_bet(bet_id)?;
        let (casino_vault, _) = self.addresses.casino_vault()?;
        let (vault_authority, _) = self.addresses.vault_authority()?;

        let (user_token, casino_token) = match tokens {
            Some(tokens) => (
                AccountMeta::new(tokens.user, false),
                AccountMeta::new(tokens.casino, false),
            ),
            None => (
                AccountMeta::new_readonly(program_id, false),
                AccountMeta::new_readonly(program_id, false),
            ),
        };

        Ok(self.instruction(
            vec![
                AccountMeta::new(vault, false),
                AccountMeta::new(*self.addresses.casino(), false),
                AccountMeta::new(casino_vault, false),
                AccountMeta::new_readonly(vault_authority, false),
                user_token,
                casino_token,
                AccountMeta::new_readonly(processed_bet, false),
                AccountMeta::new(*processor, true),
                AccountMeta::new_readonly(system_program::ID, false),
            ],
            InstructionData::new("payout").u64(amount).string(bet_id.as_str()),
        ))
    }
}
