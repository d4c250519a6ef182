//! Backoff policy for rate-limited RPCs and retry classification of
//! settlement failures

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use shared::errors::ErrorCode;
use shared::program_errors::{VaultProgramError, ACCOUNT_ALREADY_IN_USE};
use solana_sdk::instruction::InstructionError;
use solana_sdk::transaction::TransactionError;
use std::time::Duration;

use crate::ledger_gateway::GatewayError;

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Total tries of one call, the first included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter as a fraction of each delay (0.25 = ±25%)
    pub randomization: f64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            randomization: 0.25,
        }
    }
}

impl RateLimitPolicy {
    /// Delays double per attempt; elapsed time is bounded by `max_attempts`
    pub fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_max_interval(self.max_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(self.randomization)
            .with_max_elapsed_time(None)
            .build()
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Classified reason a bet could not settle
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl Failure {
    pub fn retryable(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn terminal(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<&GatewayError> for Failure {
    fn from(error: &GatewayError) -> Self {
        match error {
            GatewayError::Transaction(tx_error) => classify_transaction_error(tx_error).1,
            other => Failure::retryable(other.error_code(), other.to_string()),
        }
    }
}

/// True when an approval failed because the allowance it tried to create
/// already exists or its nonce is stale. Only meaningful for approvals.
pub fn is_nonce_race(error: &TransactionError) -> bool {
    match error {
        TransactionError::InstructionError(_, InstructionError::Custom(code)) => {
            *code == ACCOUNT_ALREADY_IN_USE
                || *code == VaultProgramError::InvalidAllowanceNonce.code()
        }
        _ => false,
    }
}

/// Classify a settlement failure, returning the index of the failing
/// instruction when the ledger reports one.
///
/// A spend or payout hitting an account that already exists has found the
/// bet's processed-bet marker: the bet settled in an earlier transaction.
pub fn classify_transaction_error(error: &TransactionError) -> (Option<usize>, Failure) {
    match error {
        TransactionError::InstructionError(index, instruction_error) => {
            let failure = match instruction_error {
                InstructionError::Custom(code) if *code == ACCOUNT_ALREADY_IN_USE => {
                    Failure::terminal(
                        ErrorCode::CONTRACT_DUPLICATE_BET,
                        "bet already processed on-chain",
                    )
                }
                InstructionError::Custom(code) => match VaultProgramError::from_custom_code(*code) {
                    Some(program_error) if program_error.is_retryable() => {
                        Failure::retryable(program_error.error_code(), program_error.to_string())
                    }
                    Some(program_error) => {
                        Failure::terminal(program_error.error_code(), program_error.to_string())
                    }
                    None => Failure::terminal(
                        ErrorCode::CONTRACT_EXECUTION_FAILED,
                        format!("unknown custom program error {}", code),
                    ),
                },
                other => Failure::terminal(ErrorCode::CONTRACT_EXECUTION_FAILED, other.to_string()),
            };
            (Some(*index as usize), failure)
        }
        TransactionError::BlockhashNotFound => (
            None,
            Failure::retryable(ErrorCode::NETWORK_BLOCKHASH_EXPIRED, error.to_string()),
        ),
        TransactionError::AlreadyProcessed
        | TransactionError::AccountInUse
        | TransactionError::WouldExceedMaxBlockCostLimit
        | TransactionError::WouldExceedMaxAccountCostLimit
        | TransactionError::WouldExceedAccountDataBlockLimit
        | TransactionError::TooManyAccountLocks
        | TransactionError::InsufficientFundsForFee
        | TransactionError::ClusterMaintenance => (
            None,
            Failure::retryable(ErrorCode::NETWORK_RPC_UNAVAILABLE, error.to_string()),
        ),
        other => (
            None,
            Failure::terminal(ErrorCode::CONTRACT_EXECUTION_FAILED, other.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoff::backoff::Backoff;

    #[test]
    fn test_should_retry() {
        let policy = RateLimitPolicy {
            max_attempts: 3,
            ..RateLimitPolicy::default()
        };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_backoff_doubles_within_jitter() {
        let policy = RateLimitPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            randomization: 0.25,
            ..RateLimitPolicy::default()
        };
        let mut backoff = policy.create_backoff();
        let delays: Vec<Duration> = (0..3).map(|_| backoff.next_backoff().unwrap()).collect();

        assert!(delays[0] >= Duration::from_millis(75) && delays[0] <= Duration::from_millis(125));
        assert!(delays[1] >= Duration::from_millis(150) && delays[1] <= Duration::from_millis(250));
        assert!(delays[2] >= Duration::from_millis(300) && delays[2] <= Duration::from_millis(500));
    }

    #[test]
    fn test_program_errors_classified() {
        let insufficient = TransactionError::InstructionError(2, InstructionError::Custom(6004));
        let (index, failure) = classify_transaction_error(&insufficient);
        assert_eq!(index, Some(2));
        assert!(!failure.retryable);
        assert_eq!(failure.code, ErrorCode::CONTRACT_INSUFFICIENT_ALLOWANCE);

        let limited = TransactionError::InstructionError(0, InstructionError::Custom(6007));
        let (_, failure) = classify_transaction_error(&limited);
        assert!(failure.retryable);
        assert_eq!(failure.code, ErrorCode::CONTRACT_RATE_LIMITED);

        let paused = TransactionError::InstructionError(1, InstructionError::Custom(6016));
        assert_eq!(classify_transaction_error(&paused).1.code, ErrorCode::CONTRACT_CASINO_PAUSED);
    }

    #[test]
    fn test_network_level_transaction_errors_retryable() {
        let (index, failure) = classify_transaction_error(&TransactionError::BlockhashNotFound);
        assert_eq!(index, None);
        assert!(failure.retryable);
        assert_eq!(failure.code, ErrorCode::NETWORK_BLOCKHASH_EXPIRED);

        let (_, failure) = classify_transaction_error(&TransactionError::SignatureFailure);
        assert!(!failure.retryable);
    }

    #[test]
    fn test_nonce_race_detection() {
        let custom = |code| TransactionError::InstructionError(0, InstructionError::Custom(code));
        assert!(is_nonce_race(&custom(0)));
        assert!(is_nonce_race(&custom(6025)));
        assert!(!is_nonce_race(&custom(6005)));
        assert!(!is_nonce_race(&TransactionError::BlockhashNotFound));
    }

    #[test]
    fn test_existing_account_in_settlement_is_terminal() {
        let error = TransactionError::InstructionError(1, InstructionError::Custom(0));
        let (index, failure) = classify_transaction_error(&error);
        assert_eq!(index, Some(1));
        assert!(!failure.retryable);
        assert_eq!(failure.code, ErrorCode::CONTRACT_DUPLICATE_BET);
        assert_ne!(failure.code, ErrorCode::CONTRACT_NONCE_RACE);
    }

    #[test]
    fn test_gateway_errors_are_retryable() {
        let failure = Failure::from(&GatewayError::Timeout("slow".into()));
        assert!(failure.retryable);
        assert_eq!(failure.code, ErrorCode::NETWORK_RPC_TIMEOUT);

        let failure = Failure::from(&GatewayError::Transaction(TransactionError::InstructionError(
            0,
            InstructionError::Custom(6003),
        )));
        assert!(!failure.retryable);
        assert_eq!(failure.code, ErrorCode::CONTRACT_ALLOWANCE_REVOKED);
    }
}
