//! Pending transactions and their lifecycle
//!
//! A [`PendingTransaction`] is created in [`TransactionState::Unsubmitted`]
//! and leaves the queue in exactly one terminal state:
//!
//! ```text
//! Unsubmitted -> Submitted -> Proposed -> Validated
//!             -> Submitted -> Resubmitting -> Submitted  (loop)
//!             -> Submitted -> Failed
//!             -> (any non-terminal) -> Expired
//! ```
//!
//! Transitions are checked with [`TransactionState::validate_transition`];
//! the manager logs and refuses anything else.

pub mod queue;
pub mod sequence;

use std::fmt;

use rtxn_ledger_core::{EngineResult, SignedTransaction, TxHash};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SubmitError, SubmitResult};
use crate::events::{EventSender, TransactionEvent};

pub use queue::{PendingQueue, QueueSnapshot, SequenceSlot, SlotSnapshot};
pub use sequence::AccountSequenceCounter;

/// Identifies a submission for the lifetime of its handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a pending transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    Unsubmitted,
    Submitted,
    Proposed,
    Resubmitting,
    Validated,
    Failed,
    Expired,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Validated | TransactionState::Failed | TransactionState::Expired
        )
    }

    /// Check that `from -> to` is a legal lifecycle step
    pub fn validate_transition(from: TransactionState, to: TransactionState) -> SubmitResult<()> {
        use TransactionState::*;

        let allowed = match from {
            Unsubmitted => matches!(to, Submitted | Validated | Failed | Expired),
            Submitted => matches!(to, Proposed | Resubmitting | Validated | Failed | Expired),
            Proposed => matches!(to, Resubmitting | Validated | Failed | Expired),
            Resubmitting => matches!(to, Submitted | Proposed | Validated | Failed | Expired),
            Validated | Failed | Expired => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(SubmitError::InvalidTransition { from, to })
        }
    }
}

/// A signed transaction the manager is responsible for
#[derive(Debug)]
pub struct PendingTransaction {
    pub id: TransactionId,
    pub signed: SignedTransaction,
    pub state: TransactionState,
    pub submit_count: u32,
    /// Last provisional or terminal result
    pub result: Option<EngineResult>,
    /// Last closed ledger when the transaction entered the queue
    pub created_ledger: u32,
    /// Last closed ledger when the blob was last sent
    pub last_submit_ledger: Option<u32>,
    /// A submit call is outstanding
    pub in_flight: bool,
    /// The slot was reported consumed; resolve through history
    pub needs_reconcile: bool,
    /// Generated by the manager to consume an abandoned slot
    pub is_filler: bool,
    /// How many fillers this slot has needed so far, this one included
    pub fill_attempt: u32,
    events: EventSender,
}

impl PendingTransaction {
    pub(crate) fn new(id: TransactionId, signed: SignedTransaction, events: EventSender) -> Self {
        Self {
            id,
            signed,
            state: TransactionState::Unsubmitted,
            submit_count: 0,
            result: None,
            created_ledger: 0,
            last_submit_ledger: None,
            in_flight: false,
            needs_reconcile: false,
            is_filler: false,
            fill_attempt: 0,
            events,
        }
    }

    pub(crate) fn filler(signed: SignedTransaction, fill_attempt: u32) -> Self {
        let id = TransactionId::new();
        let mut tx = Self::new(id, signed, EventSender::detached(id));
        tx.is_filler = true;
        tx.fill_attempt = fill_attempt;
        tx
    }

    pub(crate) fn created_at(mut self, ledger: u32) -> Self {
        self.created_ledger = ledger;
        self
    }

    pub fn sequence(&self) -> u32 {
        self.signed.sequence()
    }

    pub fn hash(&self) -> TxHash {
        self.signed.hash
    }

    pub fn last_ledger_sequence(&self) -> u32 {
        self.signed.last_ledger_sequence()
    }

    /// Move to `to`, returning the previous state
    pub fn transition_to(&mut self, to: TransactionState) -> SubmitResult<TransactionState> {
        if self.state == to {
            return Ok(to);
        }
        TransactionState::validate_transition(self.state, to)?;
        let previous = self.state;
        self.state = to;
        Ok(previous)
    }

    pub(crate) fn emit(&self, event: TransactionEvent) {
        self.events.emit(event);
    }

    /// Emit the terminal event. Consumes the transaction so it cannot be
    /// finalized twice.
    pub(crate) fn finish(mut self, state: TransactionState, result: EngineResult, validated: bool) -> FinishedTransaction {
        let previous = self.state;
        let transition = self.transition_to(state);
        self.events.emit(TransactionEvent::Final {
            sequence: Some(self.sequence()),
            hash: Some(self.hash()),
            result: result.clone(),
            validated,
        });
        FinishedTransaction {
            id: self.id,
            sequence: self.sequence(),
            hash: self.hash(),
            previous,
            state,
            result,
            is_filler: self.is_filler,
            fill_attempt: self.fill_attempt,
            transition,
        }
    }
}

/// What remains of a transaction after its terminal event
#[derive(Debug)]
pub(crate) struct FinishedTransaction {
    pub id: TransactionId,
    pub sequence: u32,
    pub hash: TxHash,
    pub previous: TransactionState,
    pub state: TransactionState,
    pub result: EngineResult,
    pub is_filler: bool,
    pub fill_attempt: u32,
    pub transition: SubmitResult<TransactionState>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use rtxn_ledger_core::{AccountId, Amount, Drops, HmacSigner, Signer, SignedTransaction, TransactionTemplate};

    pub fn alice() -> AccountId {
        AccountId::parse("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh").unwrap()
    }

    pub fn bob() -> AccountId {
        AccountId::parse("rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe").unwrap()
    }

    pub fn signed(sequence: u32, drops: u64) -> SignedTransaction {
        let prepared = TransactionTemplate::payment(alice(), bob(), Amount::native(drops))
            .prepare(sequence, Drops::new(12), 100)
            .unwrap();
        HmacSigner::new(alice(), b"test".to_vec()).sign(&prepared).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::signed;
    use super::*;
    use rtxn_ledger_core::codes;

    #[test]
    fn test_happy_path_transitions() {
        use TransactionState::*;
        assert!(TransactionState::validate_transition(Unsubmitted, Submitted).is_ok());
        assert!(TransactionState::validate_transition(Submitted, Proposed).is_ok());
        assert!(TransactionState::validate_transition(Proposed, Validated).is_ok());
        assert!(TransactionState::validate_transition(Submitted, Resubmitting).is_ok());
        assert!(TransactionState::validate_transition(Resubmitting, Submitted).is_ok());
    }

    #[test]
    fn test_terminal_states_are_final() {
        use TransactionState::*;
        for terminal in [Validated, Failed, Expired] {
            assert!(terminal.is_terminal());
            for to in [Unsubmitted, Submitted, Proposed, Resubmitting, Validated, Failed, Expired] {
                assert!(TransactionState::validate_transition(terminal, to).is_err());
            }
        }
        assert!(TransactionState::validate_transition(Submitted, Unsubmitted).is_err());
        assert!(TransactionState::validate_transition(Proposed, Submitted).is_err());
    }

    #[tokio::test]
    async fn test_finish_emits_single_final() {
        let id = TransactionId::new();
        let (sender, handle) = EventSender::channel(id);
        let mut tx = PendingTransaction::new(id, signed(3, 50), sender);
        tx.transition_to(TransactionState::Submitted).unwrap();

        let finished = tx.finish(TransactionState::Validated, EngineResult::success(), true);
        assert_eq!(finished.previous, TransactionState::Submitted);
        assert!(finished.transition.is_ok());

        let outcome = handle.wait_final().await.unwrap();
        assert_eq!(outcome.sequence, Some(3));
        assert!(outcome.validated);
    }

    #[test]
    fn test_finish_from_terminal_reports_bad_transition() {
        let id = TransactionId::new();
        let mut tx = PendingTransaction::new(id, signed(1, 5), EventSender::detached(id));
        tx.state = TransactionState::Failed;
        let finished = tx.finish(
            TransactionState::Expired,
            EngineResult::from_static(codes::TEJ_MAX_LEDGER),
            false,
        );
        assert!(finished.transition.is_err());
    }

    #[test]
    fn test_filler_flags() {
        let tx = PendingTransaction::filler(signed(2, 1), 2);
        assert!(tx.is_filler);
        assert_eq!(tx.fill_attempt, 2);
        assert_eq!(tx.state, TransactionState::Unsubmitted);
        assert_eq!(tx.sequence(), 2);
    }
}
