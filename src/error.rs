use thiserror::Error;

/// Why the wallet refused or failed to sign and broadcast a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletRejection {
    #[error("user rejected the signature request")]
    UserRejected,

    #[error("insufficient funds to cover the transfer and fees: {0}")]
    InsufficientFunds(String),

    #[error("transaction simulation failed: {0}")]
    SimulationFailed(String),

    #[error("wallet provider '{0}' is not supported")]
    ProviderUnsupported(String),

    #[error("signing timed out after {0}s")]
    TimedOut(u64),

    #[error("cancelled before the batch was broadcast")]
    Cancelled,

    #[error("wallet interaction failed: {0}")]
    Other(String),
}

impl WalletRejection {
    /// Map a raw wallet/RPC error message onto a rejection reason.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("user rejected") {
            WalletRejection::UserRejected
        } else if lower.contains("insufficient funds")
            || lower.contains("insufficient lamports")
            || lower.contains("no record of a prior credit")
        {
            WalletRejection::InsufficientFunds(message.to_string())
        } else if lower.contains("simulation failed") {
            WalletRejection::SimulationFailed(message.to_string())
        } else {
            WalletRejection::Other(message.to_string())
        }
    }
}

/// Coarse error taxonomy used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Network,
    Wallet,
    RemoteDelegate,
    Io,
}

#[derive(Error, Debug)]
pub enum DropError {
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("alias '{0}' cannot be resolved: no alias resolver configured")]
    UnsupportedAlias(String),

    #[error("failed to resolve alias '{alias}': {reason}")]
    AliasResolution { alias: String, reason: String },

    #[error("invalid amount '{0}'")]
    InvalidAmount(String),

    #[error("draw count must be a positive integer, got {0}")]
    InvalidDrawCount(i64),

    #[error("candidate pool is empty")]
    EmptyPool,

    #[error("insufficient candidates: requested {requested}, only {available} eligible")]
    InsufficientCandidates { requested: usize, available: usize },

    #[error("recipient {address} alone needs {size:?} bytes, over the {limit}-byte transaction limit")]
    OversizedRecipient {
        address: String,
        size: Option<usize>,
        limit: usize,
    },

    #[error("no valid recipients left after address validation")]
    NoRecipients,

    #[error("network error during {operation}: {detail}")]
    Network { operation: &'static str, detail: String },

    #[error(transparent)]
    Wallet(#[from] WalletRejection),

    #[error("remote draw service error: {0}")]
    RemoteDraw(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DropError {
    pub fn network(operation: &'static str, detail: impl ToString) -> Self {
        DropError::Network {
            operation,
            detail: detail.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DropError::InvalidAddress { .. }
            | DropError::UnsupportedAlias(_)
            | DropError::AliasResolution { .. }
            | DropError::InvalidAmount(_)
            | DropError::InvalidDrawCount(_)
            | DropError::EmptyPool
            | DropError::InsufficientCandidates { .. }
            | DropError::OversizedRecipient { .. }
            | DropError::NoRecipients => ErrorKind::Validation,
            DropError::Network { .. } => ErrorKind::Network,
            DropError::Wallet(_) => ErrorKind::Wallet,
            DropError::RemoteDraw(_) => ErrorKind::RemoteDelegate,
            DropError::Io(_) | DropError::Serialization(_) => ErrorKind::Io,
        }
    }
}

impl From<serde_json::Error> for DropError {
    fn from(e: serde_json::Error) -> Self {
        DropError::Serialization(e.to_string())
    }
}

impl From<csv::Error> for DropError {
    fn from(e: csv::Error) -> Self {
        DropError::Serialization(e.to_string())
    }
}

pub type Result<T, E = DropError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_rejection_classification() {
        assert_eq!(
            WalletRejection::classify("User rejected the request."),
            WalletRejection::UserRejected
        );
        assert!(matches!(
            WalletRejection::classify(
                "Transaction simulation failed: Attempt to debit an account but found no record of a prior credit."
            ),
            WalletRejection::InsufficientFunds(_)
        ));
        assert!(matches!(
            WalletRejection::classify("Transaction simulation failed: Error processing Instruction 2"),
            WalletRejection::SimulationFailed(_)
        ));
        assert!(matches!(
            WalletRejection::classify("connection reset by peer"),
            WalletRejection::Other(_)
        ));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(DropError::EmptyPool.kind(), ErrorKind::Validation);
        assert_eq!(
            DropError::InsufficientCandidates { requested: 3, available: 2 }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(DropError::network("getLatestBlockhash", "503").kind(), ErrorKind::Network);
        assert_eq!(
            DropError::from(WalletRejection::UserRejected).kind(),
            ErrorKind::Wallet
        );
        assert_eq!(DropError::RemoteDraw("down".into()).kind(), ErrorKind::RemoteDelegate);
    }
}
