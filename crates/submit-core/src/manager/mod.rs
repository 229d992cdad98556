//! The transaction manager
//!
//! One manager owns the submission state of one account. [`TransactionManager`]
//! is a cheap, cloneable handle; the state lives in a worker task that merges
//! three sources into one serial stream:
//!
//! - commands from handles (`submit`, `cancel`, `snapshot`, `shutdown`)
//! - completions of connection calls the worker spawned
//! - the connection's event stream, filtered to this account
//!
//! No two handlers for the same account ever run concurrently, so the pending
//! queue and sequence counter need no locking.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rtxn_ledger_core::{AccountId, Amount, HmacSigner, TransactionTemplate};
//! use rtxn_submit_core::{SimulatedLedger, SubmitConfig, TransactionManager};
//!
//! # tokio_test::block_on(async {
//! let alice = AccountId::parse("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh").unwrap();
//! let bob = AccountId::parse("rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe").unwrap();
//!
//! let ledger = Arc::new(SimulatedLedger::new());
//! ledger.fund(&alice, 1_000_000_000);
//! ledger.fund(&bob, 1_000_000_000);
//!
//! let signer = Arc::new(HmacSigner::new(alice.clone(), b"secret".to_vec()));
//! let manager = TransactionManager::start(ledger.clone(), signer, SubmitConfig::default())
//!     .await
//!     .expect("account is funded");
//!
//! let mut handle = manager
//!     .submit(TransactionTemplate::payment(alice, bob, Amount::native(5_000)))
//!     .await
//!     .unwrap();
//! handle.next_event().await; // provisional result
//! ledger.close_ledger();
//!
//! let outcome = handle.wait_final().await.unwrap();
//! assert!(outcome.is_success());
//! # })
//! ```

mod fees;
mod handlers;
mod reconcile;
mod worker;

use std::sync::Arc;

use rtxn_ledger_core::{AccountId, Signer, TransactionTemplate};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::config::SubmitConfig;
use crate::connection::{self, Connection, FeeSettings};
use crate::error::{SubmitError, SubmitResult};
use crate::events::{EventSender, TransactionHandle};
use crate::transaction::{QueueSnapshot, TransactionId};

use worker::ManagerWorker;

/// Requests from handles to the worker
pub(crate) enum ManagerCommand {
    Submit {
        id: TransactionId,
        template: TransactionTemplate,
        events: EventSender,
    },
    Cancel {
        id: TransactionId,
        reply: oneshot::Sender<SubmitResult<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the manager of one account
#[derive(Clone)]
pub struct TransactionManager {
    account: AccountId,
    commands: mpsc::Sender<ManagerCommand>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("account", &self.account)
            .field("running", &self.is_running())
            .finish()
    }
}

impl TransactionManager {
    /// Load the account's state from the server and start the worker
    ///
    /// Subscribes to the account's validated and proposed streams and reads
    /// its sequence with `AccountInfo`. Fails if the server cannot be reached.
    pub async fn start(
        connection: Arc<dyn Connection>,
        signer: Arc<dyn Signer>,
        config: SubmitConfig,
    ) -> SubmitResult<Self> {
        config.validate()?;
        let account = signer.account().clone();
        let timeout = config.submission_timeout;

        // Subscribe to events before loading state so nothing falls between.
        let events = connection.events();
        connection::subscribe_both(connection.as_ref(), &account, timeout).await?;
        let info = connection::account_info(connection.as_ref(), &account, timeout).await?;
        let fee = match connection::server_fee(connection.as_ref(), timeout).await {
            Ok(fee) => fee,
            Err(e) => {
                warn!(%account, error = %e, "server fee unavailable, using defaults");
                FeeSettings::default()
            }
        };

        info!(
            %account,
            sequence = info.sequence,
            ledger = info.ledger_index,
            "starting transaction manager"
        );

        let (commands, command_rx) = mpsc::channel(config.command_buffer);
        let worker = ManagerWorker::new(connection, signer, config, info, fee);
        tokio::spawn(worker.run(command_rx, events));

        Ok(Self { account, commands })
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Whether the worker is still accepting commands
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Queue a transaction for submission
    ///
    /// Returns as soon as the worker has the request; progress arrives on the
    /// handle.
    pub async fn submit(&self, template: TransactionTemplate) -> SubmitResult<TransactionHandle> {
        if template.account != self.account {
            return Err(SubmitError::WrongAccount {
                expected: self.account.clone(),
                actual: template.account,
            });
        }
        let id = TransactionId::new();
        let (events, handle) = EventSender::channel(id);
        self.commands
            .send(ManagerCommand::Submit { id, template, events })
            .await
            .map_err(|_| SubmitError::ManagerStopped)?;
        Ok(handle)
    }

    /// Supersede an outstanding transaction with a no-op at its sequence
    ///
    /// The transaction's handle still receives exactly one final event:
    /// `tejSuperseded` if the no-op wins the slot, or its own validated
    /// result if it was already on its way into a ledger.
    pub async fn cancel(&self, id: TransactionId) -> SubmitResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ManagerCommand::Cancel { id, reply })
            .await
            .map_err(|_| SubmitError::ManagerStopped)?;
        rx.await.map_err(|_| SubmitError::ManagerStopped)?
    }

    pub async fn snapshot(&self) -> SubmitResult<QueueSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ManagerCommand::Snapshot { reply })
            .await
            .map_err(|_| SubmitError::ManagerStopped)?;
        rx.await.map_err(|_| SubmitError::ManagerStopped)
    }

    /// Stop the worker
    ///
    /// Handles of transactions still outstanding observe
    /// [`SubmitError::ManagerStopped`] from `wait_final`. Dropping every
    /// manager handle instead lets the worker run until its queue drains.
    pub async fn shutdown(&self) -> SubmitResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(ManagerCommand::Shutdown { reply })
            .await
            .map_err(|_| SubmitError::ManagerStopped)?;
        rx.await.map_err(|_| SubmitError::ManagerStopped)
    }
}
