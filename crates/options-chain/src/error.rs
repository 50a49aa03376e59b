//! Error types for the options-chain crate.

use thiserror::Error;

/// Result type alias for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Errors that can occur while normalizing, classifying or storing chains.
#[derive(Error, Debug, Clone)]
pub enum ChainError {
    /// Strike is zero, negative or not a number.
    #[error("Invalid strike {strike} for contract {ticker}")]
    InvalidStrike { ticker: String, strike: f64 },

    /// A numeric input is NaN or infinite.
    #[error("Non-finite {field} for contract {ticker}")]
    NonFiniteValue { ticker: String, field: &'static str },

    /// Contract reference data is unusable.
    #[error("Invalid contract: {0}")]
    InvalidContract(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote expiry categorization failed.
    #[error("Classification error: {0}")]
    Classification(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChainError {
    /// Corrupt input that must abort a ticker's sync instead of being persisted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChainError::InvalidStrike { .. } | ChainError::NonFiniteValue { .. }
        )
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for ChainError {
    fn from(err: sqlx::Error) -> Self {
        ChainError::Storage(err.to_string())
    }
}
