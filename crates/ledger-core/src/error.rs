//! Error types for ledger-core
//!
//! Every fallible operation in this crate returns [`LedgerResult`]. The
//! variants are grouped by the value that failed to parse or combine so
//! callers can report precise problems back to whoever built the template.

use thiserror::Error;

/// Result alias used throughout ledger-core
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors produced while parsing, combining or signing ledger values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The string is not a valid classic account address
    #[error("Invalid account address: {0}")]
    InvalidAddress(String),

    /// The currency code is neither a 3-character code nor 40 hex digits
    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    /// The amount string could not be parsed
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Arithmetic left the representable range
    #[error("Amount overflow")]
    AmountOverflow,

    /// Two amounts of different assets were compared or combined
    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        /// Asset of the left-hand operand
        left: String,
        /// Asset of the right-hand operand
        right: String,
    },

    /// The engine result code has an unknown class prefix
    #[error("Invalid engine result code: {0}")]
    InvalidResultCode(String),

    /// The transaction hash is not 64 hex digits
    #[error("Invalid transaction hash: {0}")]
    InvalidHash(String),

    /// The signer refused or failed to sign the transaction
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Canonical encoding or blob decoding failed
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Encoding(err.to_string())
    }
}
