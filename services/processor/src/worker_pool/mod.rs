//! Worker pool for batch processing
//!
//! Workers claim batches from the backend, settle them through a
//! [`LedgerExecutor`] and report what happened.

mod backend_client;
mod batch_processor;
mod executor;
mod outcome;
mod pool;
mod simulation;
mod worker;

pub use pool::WorkerPool;

pub use backend_client::{BackendClient, BatchReport, SettlementApi};
pub use batch_processor::{BatchProcessor, BatchSummary};
pub use executor::{LedgerExecutor, OnChainExecutor, Prepared};
pub use outcome::{resolve, resolve_with, CoinDrawer, ResolveError, ResolvedBet, ThreadRngDrawer};
pub use simulation::SimulatedExecutor;
pub use worker::Worker;

pub(crate) use batch_processor::{attribute_failure, completed_result, failed_result};
