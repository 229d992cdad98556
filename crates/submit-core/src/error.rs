//! Error types for the submission client
//!
//! Two layers:
//!
//! - [`ConnectionError`]: a single call to the remote server went wrong. These
//!   are always transient from the manager's point of view; a transaction whose
//!   submit call failed this way stays outstanding and is retried on the next
//!   ledger close.
//! - [`SubmitError`]: what public operations on a manager return. Ledger
//!   outcomes are *not* errors; they arrive as
//!   [`TransactionEvent::Final`](crate::events::TransactionEvent::Final).

use std::time::Duration;

use rtxn_ledger_core::{AccountId, LedgerError};
use thiserror::Error;

use crate::transaction::{TransactionId, TransactionState};

/// Result type for public submission operations
pub type SubmitResult<T> = std::result::Result<T, SubmitError>;

/// Failure of one request/response exchange with the server
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// No answer within the submission timeout
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The connection is down
    #[error("connection is not established")]
    Disconnected,

    /// The server answered with an error
    #[error("server error: {message}")]
    Remote { message: String },

    /// The server answered with something other than what was asked for
    #[error("unexpected response to {request}")]
    UnexpectedResponse { request: &'static str },
}

impl ConnectionError {
    pub fn remote(message: impl Into<String>) -> Self {
        ConnectionError::Remote {
            message: message.into(),
        }
    }
}

/// Errors returned by manager operations
#[derive(Error, Debug)]
pub enum SubmitError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A connection call failed while the operation needed its answer
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Ledger data could not be built or signed
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The template or signer belongs to a different account than the manager
    #[error("account mismatch: manager for {expected}, got {actual}")]
    WrongAccount { expected: AccountId, actual: AccountId },

    /// A manager for this account is already registered
    #[error("a manager for {0} already exists")]
    DuplicateAccount(AccountId),

    /// No outstanding transaction with this id
    #[error("no outstanding transaction {0}")]
    UnknownTransaction(TransactionId),

    /// Illegal lifecycle transition
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: TransactionState,
        to: TransactionState,
    },

    /// The manager task has stopped
    #[error("transaction manager has stopped")]
    ManagerStopped,

    #[error("internal error: {0}")]
    Internal(String),
}

impl SubmitError {
    /// Whether retrying the same operation later could succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SubmitError::Connection(ConnectionError::Timeout(_) | ConnectionError::Disconnected)
        )
    }
}
