//! Handlers for commands, results and ledger ticks

use rtxn_ledger_core::{codes, EngineResult, TransactionTemplate, TxHash};
use tracing::{debug, error, info, warn};

use crate::connection::{FeeSettings, TransactionRecord};
use crate::error::{ConnectionError, SubmitError, SubmitResult};
use crate::events::{EventSender, TransactionEvent};
use crate::transaction::{PendingTransaction, TransactionId, TransactionState};

use super::worker::{log_finished, ManagerWorker};

/// A result for a tracked sequence, from a submit response or the stream
#[derive(Debug)]
pub(crate) struct ConnectionResult {
    pub sequence: u32,
    pub hash: TxHash,
    pub outcome: Result<EngineResult, ConnectionError>,
    pub validated: bool,
    pub ledger_index: Option<u32>,
    pub from_submit: bool,
}

fn reject_early(events: &EventSender, code: &'static str) {
    events.emit(TransactionEvent::Final {
        sequence: None,
        hash: None,
        result: EngineResult::from_static(code),
        validated: false,
    });
}

impl ManagerWorker {
    pub(super) fn handle_submit(&mut self, id: TransactionId, template: TransactionTemplate, events: EventSender) {
        let last_ledger = template
            .last_ledger_sequence
            .unwrap_or(self.last_closed_ledger + self.config.default_last_ledger_offset);
        if last_ledger <= self.last_closed_ledger {
            info!(
                account = %self.account,
                %id,
                last_ledger,
                closed = self.last_closed_ledger,
                "last ledger already closed, not submitting"
            );
            reject_early(&events, codes::TEJ_MAX_LEDGER);
            return;
        }

        let fee = template
            .fee
            .unwrap_or_else(|| self.fees.compute(self.config.fee_cushion));
        if fee > self.config.max_fee {
            warn!(account = %self.account, %id, %fee, max_fee = %self.config.max_fee, "fee above cap");
            reject_early(&events, codes::TEJ_MAX_FEE_EXCEEDED);
            return;
        }

        let sequence = self.counter.peek();
        let prepared = match template.prepare(sequence, fee, last_ledger) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(account = %self.account, %id, error = %e, "malformed transaction");
                reject_early(&events, codes::TEM_MALFORMED);
                return;
            }
        };
        let signed = match self.signer.sign(&prepared) {
            Ok(signed) => signed,
            Err(e) => {
                error!(account = %self.account, %id, error = %e, "signing failed");
                reject_early(&events, codes::TEJ_ABORT);
                return;
            }
        };

        if self.queue.contains(sequence) {
            error!(account = %self.account, %id, sequence, "sequence slot already occupied");
            reject_early(&events, codes::TEJ_ABORT);
            return;
        }
        self.counter.allocate();
        debug!(
            account = %self.account,
            %id,
            sequence,
            hash = %signed.hash,
            kind = prepared.kind.type_name(),
            %fee,
            last_ledger,
            "queued transaction"
        );
        let tx = PendingTransaction::new(id, signed, events).created_at(self.last_closed_ledger);
        if let Err(tx) = self.queue.insert(tx) {
            error!(account = %self.account, sequence, "sequence slot taken while queueing");
            let finished = tx.finish(
                TransactionState::Failed,
                EngineResult::from_static(codes::TEJ_ABORT),
                false,
            );
            log_finished(&self.account, &finished);
            return;
        }
        self.dispatch(sequence);
    }

    pub(super) fn handle_cancel(&mut self, id: TransactionId) -> SubmitResult<()> {
        let (sequence, is_active) = self
            .queue
            .locate(id)
            .ok_or(SubmitError::UnknownTransaction(id))?;
        if !is_active {
            return Err(SubmitError::UnknownTransaction(id));
        }
        let never_sent = match self.queue.active(sequence) {
            Some(tx) => tx.submit_count == 0 && !tx.in_flight,
            None => return Err(SubmitError::UnknownTransaction(id)),
        };

        let filler = self.build_filler(sequence, 1)?;
        self.queue.supersede(filler)?;
        info!(account = %self.account, %id, sequence, "transaction superseded by filler");

        // Never sent, so it cannot win the slot.
        if never_sent {
            if let Some(tx) = self.queue.take_superseded(sequence, id) {
                let finished = tx.finish(
                    TransactionState::Failed,
                    EngineResult::from_static(codes::TEJ_SUPERSEDED),
                    false,
                );
                log_finished(&self.account, &finished);
            }
        }
        self.dispatch(sequence);
        Ok(())
    }

    /// A submit response or a streamed transaction for this account
    pub(crate) fn on_connection_result(&mut self, result: ConnectionResult) {
        let ConnectionResult {
            sequence,
            hash,
            outcome,
            validated,
            ledger_index,
            from_submit,
        } = result;

        if from_submit && !self.settle_submit(sequence, &hash) {
            return;
        }

        let engine_result = match outcome {
            Ok(engine_result) => engine_result,
            Err(e) => {
                debug!(account = %self.account, sequence, %hash, error = %e, "submission unanswered");
                if let Some(tx) = self.queue.active(sequence) {
                    tx.emit(TransactionEvent::Timeout { sequence });
                }
                return;
            }
        };

        if validated {
            self.apply_validated(TransactionRecord {
                account: self.account.clone(),
                sequence,
                hash,
                result: engine_result,
                validated,
                ledger_index: ledger_index.unwrap_or(self.last_closed_ledger),
            });
        } else {
            self.apply_provisional(sequence, hash, engine_result);
        }
    }

    /// Clear the in-flight mark of whoever `hash` is; false if nobody
    /// active is waiting on this response
    fn settle_submit(&mut self, sequence: u32, hash: &TxHash) -> bool {
        let Some(slot) = self.queue.slot_mut(sequence) else {
            debug!(account = %self.account, sequence, %hash, "response for a resolved slot");
            return false;
        };
        if slot.active.hash() == *hash {
            let tx = &mut slot.active;
            tx.in_flight = false;
            if tx.state == TransactionState::Resubmitting {
                if let Err(e) = tx.transition_to(TransactionState::Submitted) {
                    error!(sequence, error = %e, "bad transition after resubmission");
                }
            }
            return true;
        }
        if let Some(tx) = slot.superseded.iter_mut().find(|tx| tx.hash() == *hash) {
            tx.in_flight = false;
        }
        debug!(account = %self.account, sequence, %hash, "response for a superseded transaction");
        false
    }

    fn apply_provisional(&mut self, sequence: u32, hash: TxHash, result: EngineResult) {
        let account = self.account.clone();
        let Some(tx) = self.queue.active_mut(sequence) else {
            return;
        };
        if tx.hash() != hash {
            return;
        }
        tx.result = Some(result.clone());

        if result.consumes_sequence() {
            if matches!(tx.state, TransactionState::Submitted | TransactionState::Resubmitting) {
                if let Err(e) = tx.transition_to(TransactionState::Proposed) {
                    error!(sequence, error = %e, "bad transition to proposed");
                }
            }
            debug!(%account, sequence, %result, "provisionally applied");
            tx.emit(TransactionEvent::Submitted { sequence, result });
        } else if result.is_past_sequence() {
            debug!(%account, sequence, %result, "slot already consumed, reconciling");
            tx.needs_reconcile = true;
            tx.emit(TransactionEvent::Submitted { sequence, result });
        } else if result.is(codes::TEF_MAX_LEDGER) {
            // Possibly applied earlier; history settles it once the lifetime ends.
            debug!(%account, sequence, %result, "past last ledger, awaiting expiry check");
            tx.needs_reconcile = true;
            tx.emit(TransactionEvent::Submitted { sequence, result });
        } else if result.is_retryable() {
            debug!(%account, sequence, %result, "provisional rejection, will retry");
            tx.emit(TransactionEvent::Submitted { sequence, result });
        } else {
            self.fail_active(sequence, result);
        }
    }

    /// The slot was consumed in a validated ledger
    pub(super) fn apply_validated(&mut self, record: TransactionRecord) {
        let sequence = record.sequence;
        self.counter.mark_validated(sequence);
        let Some(slot) = self.queue.remove(sequence) else {
            debug!(account = %self.account, sequence, hash = %record.hash, "validated transaction not tracked");
            return;
        };

        let (winner, losers) = slot.into_parts(&record.hash);
        let won = winner.is_some();
        match winner {
            Some(tx) => {
                let state = if record.result.is_success() {
                    TransactionState::Validated
                } else {
                    TransactionState::Failed
                };
                let finished = tx.finish(state, record.result.clone(), true);
                log_finished(&self.account, &finished);
            }
            None => {
                warn!(
                    account = %self.account,
                    sequence,
                    hash = %record.hash,
                    "slot consumed by an untracked transaction"
                );
            }
        }
        let loser_code = if won { codes::TEJ_SUPERSEDED } else { codes::TEF_PAST_SEQ };
        for tx in losers {
            let finished = tx.finish(TransactionState::Failed, EngineResult::from_static(loser_code), false);
            log_finished(&self.account, &finished);
        }

        // Sequences are consumed in order, so anything still below has been
        // consumed too and needs its own notification or a history lookup.
        for lower in self.queue.sequences().into_iter().take_while(|s| *s < sequence) {
            if let Some(tx) = self.queue.active_mut(lower) {
                tx.needs_reconcile = true;
            }
        }
    }

    /// Definitive rejection that left the slot unconsumed: fail the active
    /// transaction and put a filler in its place
    pub(super) fn fail_active(&mut self, sequence: u32, result: EngineResult) {
        let Some(active) = self.queue.active(sequence) else {
            return;
        };
        let attempt = if active.is_filler { active.fill_attempt + 1 } else { 1 };
        self.replace_with_filler(sequence, attempt, TransactionState::Failed, result);
    }

    /// The active transaction can no longer be included in a ledger
    pub(super) fn expire_active(&mut self, sequence: u32) {
        let Some(active) = self.queue.active(sequence) else {
            return;
        };
        let attempt = if active.is_filler { active.fill_attempt + 1 } else { 1 };
        self.replace_with_filler(
            sequence,
            attempt,
            TransactionState::Expired,
            EngineResult::from_static(codes::TEJ_MAX_LEDGER),
        );
    }

    fn replace_with_filler(&mut self, sequence: u32, attempt: u32, terminal: TransactionState, result: EngineResult) {
        if attempt > self.config.max_fill_attempts {
            error!(
                account = %self.account,
                sequence,
                attempts = self.config.max_fill_attempts,
                "filler attempts exhausted"
            );
            self.abandon_slot(sequence, terminal, result);
            return;
        }
        let filler = match self.build_filler(sequence, attempt) {
            Ok(filler) => filler,
            Err(e) => {
                error!(account = %self.account, sequence, error = %e, "cannot build filler");
                self.abandon_slot(sequence, terminal, result);
                return;
            }
        };
        match self.queue.replace_active(filler) {
            Ok(previous) => {
                let finished = previous.finish(terminal, result, false);
                log_finished(&self.account, &finished);
                info!(account = %self.account, sequence, attempt, "gap filler queued");
                self.dispatch(sequence);
            }
            Err(_) => {
                error!(account = %self.account, sequence, "slot vanished while filling");
            }
        }
    }

    pub(super) fn on_ledger_closed(&mut self, ledger_index: u32, fee: FeeSettings) {
        self.fees.update(fee);
        if ledger_index <= self.last_closed_ledger {
            debug!(account = %self.account, ledger_index, "stale ledger close ignored");
            return;
        }
        self.last_closed_ledger = ledger_index;
        if self.queue.is_empty() || !self.connected {
            return;
        }

        let interval = self.config.resubmit_interval_ledgers;
        let mut needs_history = false;
        let mut resend = Vec::new();
        for slot in self.queue.iter() {
            let tx = &slot.active;
            if tx.last_ledger_sequence() < ledger_index || tx.needs_reconcile {
                // Expiry is only final once history proves it never made it in.
                needs_history = true;
                continue;
            }
            // Cannot make it into any ledger after this one.
            if tx.in_flight || tx.last_ledger_sequence() <= ledger_index {
                continue;
            }
            let due = |wait: u32| {
                tx.last_submit_ledger
                    .map_or(true, |sent| ledger_index >= sent.saturating_add(wait))
            };
            let resubmit = match tx.state {
                TransactionState::Unsubmitted => true,
                TransactionState::Submitted => due(interval),
                TransactionState::Proposed => due(interval.saturating_mul(2)),
                _ => false,
            };
            if resubmit {
                resend.push(slot.sequence());
            }
        }

        debug!(
            account = %self.account,
            ledger_index,
            outstanding = self.queue.len(),
            resend = resend.len(),
            "ledger closed"
        );
        for sequence in resend {
            self.dispatch(sequence);
        }
        self.request_reconcile(needs_history, false);
    }

    pub(super) fn on_disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        warn!(
            account = %self.account,
            outstanding = self.queue.len(),
            "connection lost, resubmission suspended"
        );
    }

    pub(super) fn on_reconnect(&mut self) {
        self.connected = true;
        self.reconcile.resume_pending = true;
        info!(account = %self.account, outstanding = self.queue.len(), "connection restored, reconciling");
        self.request_reconcile(true, true);
    }

    /// Send everything that is waiting, after a reconnect pass
    pub(super) fn resume(&mut self) {
        self.reconcile.resume_pending = false;
        let closed = self.last_closed_ledger;
        let ready: Vec<u32> = self
            .queue
            .iter()
            .filter(|slot| {
                let tx = &slot.active;
                !tx.in_flight
                    && !tx.needs_reconcile
                    && tx.last_ledger_sequence() > closed
                    && !tx.state.is_terminal()
            })
            .map(|slot| slot.sequence())
            .collect();
        debug!(account = %self.account, count = ready.len(), "resuming submission");
        for sequence in ready {
            self.dispatch(sequence);
        }
    }
}
