//! Local view of an account's sequence space

use serde::{Deserialize, Serialize};

/// Next sequence to hand out and highest sequence known validated
///
/// `next_sequence > last_validated_sequence` always holds; the numbers in
/// between are outstanding work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSequenceCounter {
    next_sequence: u32,
    last_validated_sequence: u32,
}

impl AccountSequenceCounter {
    /// Start from the sequence the server expects next
    pub fn new(server_sequence: u32) -> Self {
        let next_sequence = server_sequence.max(1);
        Self {
            next_sequence,
            last_validated_sequence: next_sequence - 1,
        }
    }

    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn last_validated_sequence(&self) -> u32 {
        self.last_validated_sequence
    }

    /// Sequence the next [`allocate`](Self::allocate) will return
    pub fn peek(&self) -> u32 {
        self.next_sequence
    }

    pub fn allocate(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Sequence numbers handed out but not yet known validated
    pub fn outstanding(&self) -> u32 {
        self.next_sequence - self.last_validated_sequence - 1
    }

    /// Record that `sequence` was consumed by a validated transaction
    ///
    /// A sequence at or beyond `next_sequence` was consumed by someone else
    /// using the same account; the counter skips past it.
    pub fn mark_validated(&mut self, sequence: u32) {
        if sequence > self.last_validated_sequence {
            self.last_validated_sequence = sequence;
        }
        if sequence >= self.next_sequence {
            self.next_sequence = sequence + 1;
        }
    }

    /// Fold in the server's expected sequence from a validated ledger
    pub fn observe_server_sequence(&mut self, server_sequence: u32) {
        if server_sequence == 0 {
            return;
        }
        self.mark_validated(server_sequence - 1);
    }

    /// Hand sequences from `server_sequence` onward out again
    ///
    /// Only valid once nothing at or above `server_sequence` is outstanding,
    /// e.g. after a slot was abandoned without being consumed. Never moves
    /// below a sequence known validated.
    pub fn rewind(&mut self, server_sequence: u32) {
        let floor = server_sequence.max(self.last_validated_sequence + 1);
        if floor < self.next_sequence {
            self.next_sequence = floor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_allocation_is_monotonic() {
        let mut counter = AccountSequenceCounter::new(5);
        assert_eq!(counter.last_validated_sequence(), 4);
        assert_eq!(counter.allocate(), 5);
        assert_eq!(counter.allocate(), 6);
        assert_eq!(counter.outstanding(), 2);
        assert_eq!(counter.peek(), 7);
    }

    #[test]
    fn test_validation_advances_floor() {
        let mut counter = AccountSequenceCounter::new(1);
        counter.allocate();
        counter.allocate();
        counter.mark_validated(1);
        assert_eq!(counter.outstanding(), 1);
        counter.mark_validated(1);
        assert_eq!(counter.last_validated_sequence(), 1);
    }

    #[test]
    fn test_foreign_sequence_skips_ahead() {
        let mut counter = AccountSequenceCounter::new(3);
        counter.mark_validated(7);
        assert_eq!(counter.next_sequence(), 8);
        counter.observe_server_sequence(10);
        assert_eq!(counter.next_sequence(), 10);
        assert_eq!(counter.last_validated_sequence(), 9);
    }

    #[test]
    fn test_rewind_reuses_unconsumed_sequences() {
        let mut counter = AccountSequenceCounter::new(4);
        counter.allocate();
        counter.allocate();
        counter.rewind(4);
        assert_eq!(counter.peek(), 4);
        assert_eq!(counter.outstanding(), 0);

        counter.allocate();
        counter.allocate();
        counter.mark_validated(4);
        // Stale server view: 4 is already known consumed.
        counter.rewind(3);
        assert_eq!(counter.peek(), 5);
        counter.rewind(9);
        assert_eq!(counter.peek(), 5);
    }

    proptest! {
        #[test]
        fn next_always_exceeds_last_validated(
            start in 1u32..1000,
            ops in proptest::collection::vec((0u8..4, 0u32..50), 0..64),
        ) {
            let mut counter = AccountSequenceCounter::new(start);
            for (op, n) in ops {
                match op {
                    0 => { counter.allocate(); }
                    1 => counter.mark_validated(start + n),
                    2 => counter.rewind(start + n),
                    _ => counter.observe_server_sequence(start + n),
                }
                prop_assert!(counter.next_sequence() > counter.last_validated_sequence());
            }
        }
    }
}
