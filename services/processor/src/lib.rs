//! Settlement processor: claims bets from the backend, settles them against
//! the vault program and reports the outcome.

pub mod allowance;
pub mod config;
pub mod domain;
pub mod ledger_gateway;
pub mod reconciliation;
pub mod retry_strategy;
pub mod solana_client;
pub mod solana_instructions;
pub mod solana_tx;
pub mod worker_pool;
