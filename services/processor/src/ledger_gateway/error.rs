use shared::errors::ErrorCode;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_sdk::transaction::TransactionError;
use thiserror::Error;

/// Network-level failure of one ledger RPC
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("{op} still rate limited after {attempts} attempts")]
    RateLimitExhausted { op: &'static str, attempts: u32 },

    #[error("rpc timeout: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transaction rejected: {0}")]
    Transaction(TransactionError),

    #[error("rpc error: {0}")]
    Other(String),

    #[error("admission queue closed")]
    Closed,
}

impl GatewayError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GatewayError::RateLimited(_))
    }

    /// Endpoint looks unreachable; worth trying another one
    pub fn is_connectivity(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::Transport(_))
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            GatewayError::RateLimited(_) | GatewayError::RateLimitExhausted { .. } => {
                ErrorCode::NETWORK_RPC_RATE_LIMITED
            }
            GatewayError::Timeout(_) => ErrorCode::NETWORK_RPC_TIMEOUT,
            GatewayError::Transport(_) | GatewayError::Other(_) | GatewayError::Closed => {
                ErrorCode::NETWORK_RPC_UNAVAILABLE
            }
            GatewayError::Transaction(_) => ErrorCode::CONTRACT_EXECUTION_FAILED,
        }
    }
}

fn looks_rate_limited(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("429") || lower.contains("too many requests") || lower.contains("rate limit")
}

impl From<ClientError> for GatewayError {
    fn from(error: ClientError) -> Self {
        if let Some(tx_error) = error.get_transaction_error() {
            return GatewayError::Transaction(tx_error);
        }

        let message = error.to_string();
        match error.kind() {
            ClientErrorKind::Reqwest(inner) => {
                if inner.status().map(|s| s.as_u16()) == Some(429) {
                    GatewayError::RateLimited(message)
                } else if inner.is_timeout() {
                    GatewayError::Timeout(message)
                } else {
                    GatewayError::Transport(message)
                }
            }
            ClientErrorKind::Io(_) => GatewayError::Transport(message),
            _ if looks_rate_limited(&message) => GatewayError::RateLimited(message),
            _ => GatewayError::Other(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_text_detection() {
        assert!(looks_rate_limited("HTTP status client error (429 Too Many Requests)"));
        assert!(looks_rate_limited("Too many requests for a specific RPC call"));
        assert!(looks_rate_limited("rate limit exceeded"));
        assert!(!looks_rate_limited("blockhash not found"));
    }

    #[test]
    fn test_custom_client_error_classification() {
        let custom = |message: &str| -> GatewayError {
            ClientError::from(ClientErrorKind::Custom(message.to_string())).into()
        };
        assert!(custom("429 Too Many Requests").is_rate_limited());
        assert!(matches!(custom("node is behind"), GatewayError::Other(_)));
    }

    #[test]
    fn test_io_error_is_transport() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error: GatewayError = ClientError::from(ClientErrorKind::Io(io)).into();
        assert!(error.is_connectivity());
        assert_eq!(error.error_code(), ErrorCode::NETWORK_RPC_UNAVAILABLE);
    }

    #[test]
    fn test_transaction_error_preserved() {
        let kind = ClientErrorKind::TransactionError(TransactionError::BlockhashNotFound);
        let error: GatewayError = ClientError::from(kind).into();
        assert_eq!(error, GatewayError::Transaction(TransactionError::BlockhashNotFound));
    }
}
