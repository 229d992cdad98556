//! Pending queue, ordered by sequence
//!
//! Each occupied sequence number is a [`SequenceSlot`] with one active
//! transaction (the one being submitted and resubmitted) and any transactions
//! it superseded. Superseded transactions are never sent again but may still
//! win the slot, so they stay until the slot resolves.

use std::collections::BTreeMap;

use rtxn_ledger_core::{AccountId, EngineResult, TxHash};
use serde::{Deserialize, Serialize};

use crate::error::{SubmitError, SubmitResult};
use crate::transaction::{PendingTransaction, TransactionId, TransactionState};

/// Everything racing for one sequence number
#[derive(Debug)]
pub struct SequenceSlot {
    pub active: PendingTransaction,
    pub superseded: Vec<PendingTransaction>,
}

impl SequenceSlot {
    fn new(active: PendingTransaction) -> Self {
        Self {
            active,
            superseded: Vec::new(),
        }
    }

    pub fn sequence(&self) -> u32 {
        self.active.sequence()
    }

    pub fn contains_hash(&self, hash: &TxHash) -> bool {
        self.active.hash() == *hash || self.superseded.iter().any(|tx| tx.hash() == *hash)
    }

    /// Split into the transaction with `hash` (if any) and all the others
    pub fn into_parts(self, hash: &TxHash) -> (Option<PendingTransaction>, Vec<PendingTransaction>) {
        let mut winner = None;
        let mut losers = Vec::with_capacity(self.superseded.len() + 1);
        for tx in std::iter::once(self.active).chain(self.superseded) {
            if winner.is_none() && tx.hash() == *hash {
                winner = Some(tx);
            } else {
                losers.push(tx);
            }
        }
        (winner, losers)
    }
}

/// Outstanding transactions of one account
#[derive(Debug, Default)]
pub struct PendingQueue {
    slots: BTreeMap<u32, SequenceSlot>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied sequence slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, sequence: u32) -> bool {
        self.slots.contains_key(&sequence)
    }

    /// Occupy a free slot; an occupied slot hands `tx` back
    pub fn insert(&mut self, tx: PendingTransaction) -> Result<(), PendingTransaction> {
        let sequence = tx.sequence();
        if self.slots.contains_key(&sequence) {
            return Err(tx);
        }
        self.slots.insert(sequence, SequenceSlot::new(tx));
        Ok(())
    }

    /// Make `tx` the active transaction of its occupied slot; the previous
    /// active one keeps racing as superseded
    pub fn supersede(&mut self, tx: PendingTransaction) -> SubmitResult<()> {
        let sequence = tx.sequence();
        let slot = self
            .slots
            .get_mut(&sequence)
            .ok_or_else(|| SubmitError::Internal(format!("no slot at sequence {}", sequence)))?;
        let previous = std::mem::replace(&mut slot.active, tx);
        slot.superseded.push(previous);
        Ok(())
    }

    /// Swap the active transaction of a slot, handing back the old one
    pub fn replace_active(&mut self, tx: PendingTransaction) -> Result<PendingTransaction, PendingTransaction> {
        match self.slots.get_mut(&tx.sequence()) {
            Some(slot) => Ok(std::mem::replace(&mut slot.active, tx)),
            None => Err(tx),
        }
    }

    pub fn slot(&self, sequence: u32) -> Option<&SequenceSlot> {
        self.slots.get(&sequence)
    }

    pub fn slot_mut(&mut self, sequence: u32) -> Option<&mut SequenceSlot> {
        self.slots.get_mut(&sequence)
    }

    pub fn active(&self, sequence: u32) -> Option<&PendingTransaction> {
        self.slots.get(&sequence).map(|slot| &slot.active)
    }

    pub fn active_mut(&mut self, sequence: u32) -> Option<&mut PendingTransaction> {
        self.slots.get_mut(&sequence).map(|slot| &mut slot.active)
    }

    /// Remove a resolved slot
    pub fn remove(&mut self, sequence: u32) -> Option<SequenceSlot> {
        self.slots.remove(&sequence)
    }

    /// Take a superseded transaction out of its slot
    pub fn take_superseded(&mut self, sequence: u32, id: TransactionId) -> Option<PendingTransaction> {
        let slot = self.slots.get_mut(&sequence)?;
        let index = slot.superseded.iter().position(|tx| tx.id == id)?;
        Some(slot.superseded.remove(index))
    }

    /// Occupied sequences in ascending order
    pub fn sequences(&self) -> Vec<u32> {
        self.slots.keys().copied().collect()
    }

    pub fn lowest_sequence(&self) -> Option<u32> {
        self.slots.keys().next().copied()
    }

    /// Sequence of the slot holding `id`, and whether it is the active one
    pub fn locate(&self, id: TransactionId) -> Option<(u32, bool)> {
        self.slots.iter().find_map(|(sequence, slot)| {
            if slot.active.id == id {
                Some((*sequence, true))
            } else if slot.superseded.iter().any(|tx| tx.id == id) {
                Some((*sequence, false))
            } else {
                None
            }
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SequenceSlot> {
        self.slots.values()
    }

    /// Drain every slot, lowest sequence first
    pub fn drain(&mut self) -> Vec<SequenceSlot> {
        std::mem::take(&mut self.slots).into_values().collect()
    }

    pub fn slot_snapshots(&self) -> Vec<SlotSnapshot> {
        self.slots
            .values()
            .map(|slot| SlotSnapshot {
                sequence: slot.sequence(),
                id: slot.active.id,
                hash: slot.active.hash(),
                state: slot.active.state,
                submit_count: slot.active.submit_count,
                last_ledger_sequence: slot.active.last_ledger_sequence(),
                result: slot.active.result.clone(),
                is_filler: slot.active.is_filler,
                superseded: slot.superseded.iter().map(|tx| tx.id).collect(),
            })
            .collect()
    }
}

/// Serializable view of one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub sequence: u32,
    pub id: TransactionId,
    pub hash: TxHash,
    pub state: TransactionState,
    pub submit_count: u32,
    pub last_ledger_sequence: u32,
    pub result: Option<EngineResult>,
    pub is_filler: bool,
    pub superseded: Vec<TransactionId>,
}

/// Serializable view of a manager's queue and counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub account: AccountId,
    pub next_sequence: u32,
    pub last_validated_sequence: u32,
    pub last_closed_ledger: u32,
    pub connected: bool,
    pub slots: Vec<SlotSnapshot>,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
