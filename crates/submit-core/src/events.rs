//! Per-transaction lifecycle events
//!
//! Every submission gets its own channel. The manager holds the sending half
//! inside the pending transaction; the caller holds a [`TransactionHandle`].
//! When the transaction leaves the queue the sender is dropped, so a handle
//! sees exactly one [`TransactionEvent::Final`] followed by end-of-stream.

use rtxn_ledger_core::{EngineResult, TxHash};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{SubmitError, SubmitResult};
use crate::transaction::TransactionId;

/// Lifecycle notifications for one transaction
///
/// Everything except `Final` is advisory and may repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransactionEvent {
    /// The server answered a submission, or reported the transaction
    /// provisionally applied
    Submitted { sequence: u32, result: EngineResult },

    /// The unchanged blob was sent again
    Resubmitted { sequence: u32, attempt: u32 },

    /// A submission went unanswered; the ledger-close cycle will retry
    Timeout { sequence: u32 },

    /// Terminal outcome. `sequence` and `hash` are absent when the
    /// transaction was rejected before a sequence was assigned.
    Final {
        sequence: Option<u32>,
        hash: Option<TxHash>,
        result: EngineResult,
        validated: bool,
    },
}

impl TransactionEvent {
    pub fn is_final(&self) -> bool {
        matches!(self, TransactionEvent::Final { .. })
    }
}

/// Terminal outcome plus the advisory events that preceded it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalOutcome {
    pub result: EngineResult,
    pub validated: bool,
    pub sequence: Option<u32>,
    pub hash: Option<TxHash>,
    pub history: Vec<TransactionEvent>,
}

impl FinalOutcome {
    /// Validated with `tesSUCCESS`
    pub fn is_success(&self) -> bool {
        self.validated && self.result.is_success()
    }

    /// Whether an advisory `Submitted` event carried `code`
    pub fn saw_result(&self, code: &str) -> bool {
        self.history.iter().any(|event| {
            matches!(event, TransactionEvent::Submitted { result, .. } if result.is(code))
        })
    }
}

/// Sending half of a transaction's event channel
#[derive(Debug)]
pub(crate) struct EventSender {
    id: TransactionId,
    tx: Option<mpsc::UnboundedSender<TransactionEvent>>,
}

impl EventSender {
    pub(crate) fn channel(id: TransactionId) -> (Self, TransactionHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self { id, tx: Some(tx) },
            TransactionHandle { id, events: rx },
        )
    }

    /// A sender nobody listens to, for internally generated fillers
    pub(crate) fn detached(id: TransactionId) -> Self {
        Self { id, tx: None }
    }

    pub(crate) fn emit(&self, event: TransactionEvent) {
        if let Some(tx) = &self.tx {
            // The caller may have dropped its handle; the transaction
            // continues regardless.
            if tx.send(event).is_err() {
                trace!(id = %self.id, "event dropped, handle closed");
            }
        }
    }
}

/// Caller's view of a submitted transaction
#[derive(Debug)]
pub struct TransactionHandle {
    id: TransactionId,
    events: mpsc::UnboundedReceiver<TransactionEvent>,
}

impl TransactionHandle {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Next event, or `None` once the final event has been consumed
    pub async fn next_event(&mut self) -> Option<TransactionEvent> {
        self.events.recv().await
    }

    /// Next event if one is already queued
    pub fn try_next_event(&mut self) -> Option<TransactionEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the terminal outcome
    ///
    /// Fails with [`SubmitError::ManagerStopped`] if the manager went away
    /// before finalizing the transaction.
    pub async fn wait_final(mut self) -> SubmitResult<FinalOutcome> {
        let mut history = Vec::new();
        while let Some(event) = self.events.recv().await {
            if let TransactionEvent::Final {
                sequence,
                hash,
                result,
                validated,
            } = event
            {
                return Ok(FinalOutcome {
                    result,
                    validated,
                    sequence,
                    hash,
                    history,
                });
            }
            history.push(event);
        }
        Err(SubmitError::ManagerStopped)
    }
}
