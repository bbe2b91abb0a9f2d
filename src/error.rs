//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed batch: empty postings, non-positive amount, empty
    /// asset, or source equal to destination
    #[error("invalid transaction: {0}")]
    Validation(String),

    /// A non-`world` account would go negative
    #[error(
        "insufficient funds on {account} for {asset}: needed {needed}, available {available}"
    )]
    InsufficientFunds {
        /// Account short of funds
        account: String,
        /// Asset of the shortfall
        asset: String,
        /// Net amount the batch debits from the account
        needed: i64,
        /// Committed balance before the batch
        available: i64,
    },

    /// Reference collides within the batch or with a committed
    /// transaction
    #[error("conflicting reference: {0}")]
    ConflictingReference(String),

    /// Transaction id does not exist
    #[error("transaction not found: {0}")]
    TransactionNotFound(u64),

    /// Storage port failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid ledger name or ledger construction failure
    #[error("resolver error: {0}")]
    Resolver(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_message() {
        let err = Error::InsufficientFunds {
            account: "users:001".to_string(),
            asset: "COIN".to_string(),
            needed: 10,
            available: 3,
        };
        let message = err.to_string();
        assert!(message.contains("users:001"));
        assert!(message.contains("COIN"));
        assert!(message.contains("10"));
        assert!(message.contains('3'));
    }

    #[test]
    fn test_io_conversion() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
