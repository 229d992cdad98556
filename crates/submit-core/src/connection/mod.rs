//! The contract between the manager and a ledger server
//!
//! A [`Connection`] offers two things: request/response [`Connection::call`]s
//! and a broadcast stream of [`ConnectionEvent`]s. Several account managers
//! may share one connection; each filters the stream to its own account.
//!
//! The manager never assumes a call reached the server. A call that errors or
//! times out is "unanswered", and the ledger-close cycle decides what to do.

pub mod simulated;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rtxn_ledger_core::{AccountId, Drops, EngineResult, TxHash};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ConnectionError;

pub use simulated::SimulatedLedger;

/// Reference load factor; a server at normal load reports exactly this
pub const LOAD_BASE: u32 = 256;

/// Requests a manager makes of the server
#[derive(Debug, Clone)]
pub enum LedgerRequest {
    /// Submit a signed blob
    Submit { blob: Arc<Vec<u8>> },
    /// Sequence and balance of an account in the latest validated ledger
    AccountInfo { account: AccountId },
    /// Validated transactions of an account from `min_ledger` on
    AccountTransactions {
        account: AccountId,
        min_ledger: Option<u32>,
    },
    /// Current fee settings
    ServerFee,
    /// Start streaming an account's transactions; `proposed` selects the
    /// provisional stream instead of the validated one
    Subscribe { account: AccountId, proposed: bool },
}

impl LedgerRequest {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerRequest::Submit { .. } => "submit",
            LedgerRequest::AccountInfo { .. } => "account_info",
            LedgerRequest::AccountTransactions { .. } => "account_tx",
            LedgerRequest::ServerFee => "server_fee",
            LedgerRequest::Subscribe { .. } => "subscribe",
        }
    }
}

/// Answers to [`LedgerRequest`]s
#[derive(Debug, Clone)]
pub enum LedgerResponse {
    /// Preliminary result of applying a submitted blob to the open ledger
    Submitted { result: EngineResult, hash: TxHash },
    AccountInfo(AccountInfo),
    AccountTransactions(TransactionHistory),
    ServerFee(FeeSettings),
    Subscribed,
}

/// Account state in the latest validated ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account: AccountId,
    /// Sequence the next transaction must carry
    pub sequence: u32,
    pub balance: Drops,
    /// Index of the validated ledger this was read from
    pub ledger_index: u32,
}

/// One transaction as reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub account: AccountId,
    pub sequence: u32,
    pub hash: TxHash,
    pub result: EngineResult,
    pub validated: bool,
    /// Ledger the transaction was (or is proposed to be) included in
    pub ledger_index: u32,
}

/// Validated history of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHistory {
    pub records: Vec<TransactionRecord>,
    /// Highest validated ledger the history covers
    pub ledger_index_max: u32,
}

/// Fee settings of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSettings {
    pub base_fee: Drops,
    /// Load factor relative to [`LOAD_BASE`]
    pub load_factor: u32,
}

impl FeeSettings {
    /// Minimum fee the server currently accepts, rounded up
    pub fn scaled_fee(&self) -> Drops {
        let base = u128::from(self.base_fee.get());
        let load = u128::from(self.load_factor.max(1));
        let scaled = (base * load + u128::from(LOAD_BASE) - 1) / u128::from(LOAD_BASE);
        Drops::new(u64::try_from(scaled).unwrap_or(u64::MAX))
    }
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            base_fee: Drops::new(10),
            load_factor: LOAD_BASE,
        }
    }
}

/// Asynchronous notifications from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    LedgerClosed { ledger_index: u32, fee: FeeSettings },
    Transaction(TransactionRecord),
}

/// Duplex channel to a ledger server
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one request and wait for its answer
    async fn call(&self, request: LedgerRequest) -> Result<LedgerResponse, ConnectionError>;

    /// A fresh receiver for the event stream
    fn events(&self) -> broadcast::Receiver<ConnectionEvent>;

    fn is_connected(&self) -> bool;

    /// Subscribe to an account's validated transactions
    async fn subscribe_account(&self, account: &AccountId) -> Result<(), ConnectionError> {
        expect_subscribed(
            self.call(LedgerRequest::Subscribe {
                account: account.clone(),
                proposed: false,
            })
            .await?,
        )
    }

    /// Subscribe to an account's provisionally applied transactions
    async fn subscribe_account_proposed(&self, account: &AccountId) -> Result<(), ConnectionError> {
        expect_subscribed(
            self.call(LedgerRequest::Subscribe {
                account: account.clone(),
                proposed: true,
            })
            .await?,
        )
    }
}

fn expect_subscribed(response: LedgerResponse) -> Result<(), ConnectionError> {
    match response {
        LedgerResponse::Subscribed => Ok(()),
        _ => Err(ConnectionError::UnexpectedResponse {
            request: "subscribe",
        }),
    }
}

/// Issue a call, giving up after `timeout`
pub async fn call_with_timeout(
    connection: &dyn Connection,
    request: LedgerRequest,
    timeout: Duration,
) -> Result<LedgerResponse, ConnectionError> {
    match tokio::time::timeout(timeout, connection.call(request)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Timeout(timeout)),
    }
}

/// Submit a blob and unpack the preliminary result
pub async fn submit_blob(
    connection: &dyn Connection,
    blob: Arc<Vec<u8>>,
    timeout: Duration,
) -> Result<EngineResult, ConnectionError> {
    match call_with_timeout(connection, LedgerRequest::Submit { blob }, timeout).await? {
        LedgerResponse::Submitted { result, .. } => Ok(result),
        _ => Err(ConnectionError::UnexpectedResponse { request: "submit" }),
    }
}

pub async fn account_info(
    connection: &dyn Connection,
    account: &AccountId,
    timeout: Duration,
) -> Result<AccountInfo, ConnectionError> {
    let request = LedgerRequest::AccountInfo {
        account: account.clone(),
    };
    match call_with_timeout(connection, request, timeout).await? {
        LedgerResponse::AccountInfo(info) => Ok(info),
        _ => Err(ConnectionError::UnexpectedResponse {
            request: "account_info",
        }),
    }
}

pub async fn account_transactions(
    connection: &dyn Connection,
    account: &AccountId,
    min_ledger: Option<u32>,
    timeout: Duration,
) -> Result<TransactionHistory, ConnectionError> {
    let request = LedgerRequest::AccountTransactions {
        account: account.clone(),
        min_ledger,
    };
    match call_with_timeout(connection, request, timeout).await? {
        LedgerResponse::AccountTransactions(history) => Ok(history),
        _ => Err(ConnectionError::UnexpectedResponse {
            request: "account_tx",
        }),
    }
}

pub async fn server_fee(
    connection: &dyn Connection,
    timeout: Duration,
) -> Result<FeeSettings, ConnectionError> {
    match call_with_timeout(connection, LedgerRequest::ServerFee, timeout).await? {
        LedgerResponse::ServerFee(fee) => Ok(fee),
        _ => Err(ConnectionError::UnexpectedResponse {
            request: "server_fee",
        }),
    }
}

/// Both account subscriptions, validated stream first
pub async fn subscribe_both(
    connection: &dyn Connection,
    account: &AccountId,
    timeout: Duration,
) -> Result<(), ConnectionError> {
    tokio::time::timeout(timeout, connection.subscribe_account(account))
        .await
        .map_err(|_| ConnectionError::Timeout(timeout))??;
    tokio::time::timeout(timeout, connection.subscribe_account_proposed(account))
        .await
        .map_err(|_| ConnectionError::Timeout(timeout))??;
    Ok(())
}
