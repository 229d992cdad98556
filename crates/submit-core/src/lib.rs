//! Reliable transaction submission for account/sequence ledgers
//!
//! A [`TransactionManager`] owns the outstanding transactions of one account.
//! It assigns sequence numbers, submits signed blobs over a [`Connection`],
//! follows each transaction through provisional and validated results, and
//! resubmits on ledger closes until the transaction is validated, rejected
//! for good, or past its last ledger. Slots that would otherwise leave a hole
//! in the account's sequence are filled with no-op transactions.
//!
//! Every submission reports through its own [`TransactionHandle`], which
//! yields exactly one [`TransactionEvent::Final`].
//!
//! ## Layout
//!
//! - [`manager`]: the per-account worker and its handle
//! - [`transaction`]: pending transactions, the sequence counter and queue
//! - [`connection`]: the server contract, plus [`SimulatedLedger`] for tests
//!   and local runs
//! - [`registry`]: [`ManagerSet`], several accounts over one connection
//! - [`events`], [`config`], [`logging`], [`error`]

// Error handling
pub mod error;

// Configuration and logging
pub mod config;
pub mod logging;

// Server contract
pub mod connection;

// Transaction state
pub mod events;
pub mod transaction;

// Submission
pub mod manager;
pub mod registry;

// Public exports
pub use config::SubmitConfig;
pub use connection::{
    AccountInfo, Connection, ConnectionEvent, FeeSettings, LedgerRequest, LedgerResponse,
    SimulatedLedger, TransactionHistory, TransactionRecord,
};
pub use error::{ConnectionError, SubmitError, SubmitResult};
pub use events::{FinalOutcome, TransactionEvent, TransactionHandle};
pub use logging::{setup_logging, LoggingConfig};
pub use manager::TransactionManager;
pub use registry::ManagerSet;
pub use transaction::{QueueSnapshot, SlotSnapshot, TransactionId, TransactionState};

/// Everything needed to submit transactions
pub mod prelude {
    pub use super::{
        Connection, ConnectionEvent, FinalOutcome, ManagerSet, SimulatedLedger, SubmitConfig,
        SubmitError, SubmitResult, TransactionEvent, TransactionHandle, TransactionId,
        TransactionManager, TransactionState,
    };
    pub use rtxn_ledger_core::{
        codes, AccountId, Amount, Drops, EngineResult, HmacSigner, Signer, TransactionTemplate,
    };
}
